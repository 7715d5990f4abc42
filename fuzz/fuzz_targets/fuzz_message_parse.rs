#![no_main]

use chat_relay::utils::crypto;
use chat_relay::ParsedMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = ParsedMessage::parse(text);
    }
    let _ = crypto::decode(data);
});
