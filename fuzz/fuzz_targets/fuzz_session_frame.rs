#![no_main]

use libfuzzer_sys::fuzz_target;
use strand_crypto::SessionKey;
use strand_protocol::codec::decode_session_frame;

// Decrypting forged session frames must fail cleanly.
fuzz_target!(|data: &[u8]| {
    let key = SessionKey::new([7u8; 32]);
    let _ = decode_session_frame(data, &key);
});
