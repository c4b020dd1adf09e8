//! Fuzz target: `FrameDecoder`
//!
//! Drives arbitrary byte sequences into the streaming decoder, split at a
//! fuzzer-chosen point, and checks that splitting never changes the
//! decoded frames and that no payload exceeds its bound.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use gwlink::proto::{FrameDecoder, MAX_PAYLOAD, payload::WirePayload};
use gwlink::proto::{CommandResponse, EventRecord, SnapshotRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };

    let mut whole = Vec::new();
    FrameDecoder::new().feed_all(data, |o| whole.push(o));

    let cut = usize::from(split).min(data.len());
    let mut pieces = Vec::new();
    let mut decoder = FrameDecoder::new();
    decoder.feed_all(&data[..cut], |o| pieces.push(o));
    decoder.feed_all(&data[cut..], |o| pieces.push(o));
    assert_eq!(whole, pieces, "chunking changed the decode");

    for frame in whole.into_iter().flatten() {
        assert!(frame.payload.len() <= MAX_PAYLOAD);
        // Payload decoders accept any length.
        let _ = CommandResponse::decode(&frame.payload);
        let _ = EventRecord::decode(&frame.payload);
        let _ = SnapshotRecord::decode(&frame.payload);
    }
});
