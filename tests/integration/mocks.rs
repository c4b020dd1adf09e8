//! Recording collaborators for link integration tests.
//!
//! Each mock hands out a shared handle so the test can inspect what the
//! link delivered after the collaborator has been moved into it.

use std::sync::{Arc, Mutex};

use gwlink::adapters::nvs::NvsAdapter;
use gwlink::app::events::LinkEvent;
use gwlink::app::ports::{DeviceBlobSink, EventSink};
use gwlink::link::Collaborators;
use gwlink::storage::KvBackend;
use gwlink::stores::DeviceStore;

pub type Store = DeviceStore<KvBackend<NvsAdapter>>;

#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<Vec<LinkEvent>>>);

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &LinkEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn events(&self) -> Vec<LinkEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[derive(Clone, Default)]
pub struct RecordingBlobs(pub Arc<Mutex<Vec<Vec<u8>>>>);

impl DeviceBlobSink for RecordingBlobs {
    fn store(&mut self, blob: &[u8]) -> gwlink::Result<()> {
        self.0.lock().unwrap().push(blob.to_vec());
        Ok(())
    }
}

impl RecordingBlobs {
    pub fn blobs(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }
}

/// Everything a test needs to observe the link's side effects.
pub struct Harness {
    pub events: RecordingSink,
    pub blobs: RecordingBlobs,
    pub store: Arc<Store>,
}

impl Harness {
    pub fn new() -> Self {
        let nvs = NvsAdapter::new().unwrap();
        Self {
            events: RecordingSink::default(),
            blobs: RecordingBlobs::default(),
            store: Arc::new(DeviceStore::init(KvBackend::new(nvs)).unwrap()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            events: Box::new(self.events.clone()),
            registry: self.store.clone(),
            device_blob: Box::new(self.blobs.clone()),
        }
    }
}
