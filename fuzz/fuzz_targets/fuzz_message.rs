#![no_main]

use libfuzzer_sys::fuzz_target;
use media_meta::Message;

fuzz_target!(|data: &[u8]| {
    // Malformed messages from the other side must decode to an error
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(message) = Message::from_json(text) {
            let _ = message.to_json();
        }
    }
});
