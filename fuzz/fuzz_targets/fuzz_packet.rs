#![no_main]

use duel_link::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw-byte path: serde_json's own UTF-8 validation.
    let _ = serde_json::from_slice::<Packet>(data);

    // What the session loop actually does with a text frame. Anything that
    // decodes must encode again.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(packet) = Packet::decode(text) {
            let _ = packet.encode();
        }
    }
});
