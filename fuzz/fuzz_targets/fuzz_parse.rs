#![no_main]

use libfuzzer_sys::fuzz_target;
use media_meta::{ByteReader, Format};

fuzz_target!(|data: &[u8]| {
    // Feed the same window to every parser
    // This should NEVER panic, only return errors
    for format in Format::all() {
        let window = &data[..data.len().min(format.header_bytes())];
        let mut reader = ByteReader::from_bytes(window);
        if let Ok(record) = format.parse_header(&mut reader) {
            // Whatever was extracted must survive the wire encoding
            let _ = serde_json::to_string(&record);
        }
    }
});
