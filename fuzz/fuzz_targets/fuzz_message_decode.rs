#![no_main]

use libfuzzer_sys::fuzz_target;
use strand_protocol::codec::decode_message;
use strand_protocol::{Envelope, RouteTable, SessionHello};

fuzz_target!(|data: &[u8]| {
    // Envelope content.
    let _ = decode_message(data);

    // Envelope JSON, then its integrity check.
    if let Ok(envelope) = Envelope::from_json(data) {
        let _ = envelope.verify_integrity();
        let _ = envelope.sent_at();
    }

    // Handshake hello and gossiped route tables arrive as JSON too.
    let _ = serde_json::from_slice::<SessionHello>(data);
    if let Ok(table) = serde_json::from_slice::<RouteTable>(data) {
        let _ = table.verify();
    }
});
