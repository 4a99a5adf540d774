#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use recipiece_cache::protocol::decode::FrameScanner;
use recipiece_cache::protocol::decode_frame;

#[derive(Debug)]
struct StreamingInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for StreamingInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        let data: Vec<u8> = u.arbitrary()?;
        let split_points: Vec<u8> = u.arbitrary()?;
        Ok(Self { data, split_points })
    }
}

fuzz_target!(|input: StreamingInput| {
    if input.data.is_empty() {
        return;
    }

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Chunked delivery must decode the same frames as one-shot delivery
    let mut whole = Vec::new();
    let mut buf = BytesMut::from(&input.data[..]);
    while let Ok((frame, consumed)) = decode_frame(&buf) {
        whole.push(frame);
        buf.advance(consumed);
    }

    // Chunked side goes through the resumable scanner, as the connection does
    let mut chunked = Vec::new();
    let mut buf = BytesMut::new();
    let mut scanner = FrameScanner::new();
    'chunks: for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);
        loop {
            match scanner.scan(&buf) {
                Ok(Some(len)) => match decode_frame(&buf[..len]) {
                    Ok((frame, consumed)) => {
                        assert_eq!(consumed, len);
                        chunked.push(frame);
                        buf.advance(consumed);
                    }
                    Err(_) => break 'chunks,
                },
                Ok(None) => break,
                Err(_) => break 'chunks,
            }
        }
    }

    assert_eq!(&whole[..chunked.len().min(whole.len())], &chunked[..chunked.len().min(whole.len())]);
});
