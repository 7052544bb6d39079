#![no_main]

use libfuzzer_sys::fuzz_target;

// Length-prefixed framing over arbitrary bytes: never panics, never
// allocates past the bound, and a returned body fits in the input.
fuzz_target!(|data: &[u8]| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        let mut reader = data;
        if let Ok(body) = strand_protocol::read_frame_bounded(&mut reader, 64 * 1024).await {
            assert!(body.len() + 4 <= data.len());
            assert!(body.len() <= 64 * 1024);
        }
    });
});
