#![no_main]

use libfuzzer_sys::fuzz_target;
use pg_secrets_connector::protocol::decode_message;

fuzz_target!(|data: &[u8]| {
    // Several messages may arrive in a single TCP segment
    let mut offset = 0;
    while offset < data.len() {
        match decode_message(&data[offset..]) {
            Ok(Some((_, consumed))) => {
                assert!(consumed > 0 && offset + consumed <= data.len());
                offset += consumed;
            }
            Ok(None) | Err(_) => break,
        }
    }
});
