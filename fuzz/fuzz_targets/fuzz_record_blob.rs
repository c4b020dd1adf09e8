//! Fuzz target: persisted device inventory blobs.
//!
//! A flash blob is untrusted input after power loss or a firmware change;
//! decoding must reject or accept it without panicking.
//!
//! cargo fuzz run fuzz_record_blob

#![no_main]

use gwlink::storage::decode_blob;
use gwlink::stores::devices::{DESCRIPTOR, DeviceRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(items) = decode_blob::<DeviceRecord>(&DESCRIPTOR, data) {
        assert!(items.len() <= DESCRIPTOR.max_items);
    }
});
