#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use recipiece_cache::protocol::{decode_frame, encode_frame};

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // Several replies may arrive in one read
    while !buf.is_empty() {
        match decode_frame(&buf) {
            Ok((frame, consumed)) => {
                assert!(consumed > 0 && consumed <= buf.len());
                // Anything decoded must re-encode to something decodable
                let encoded = encode_frame(&frame);
                assert!(decode_frame(&encoded).is_ok());
                buf.advance(consumed);
            }
            Err(_) => break,
        }
    }
});
