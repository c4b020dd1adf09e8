//! Stores over the file backend, as deployed on the data partition.

use gwlink::app::ports::{DeviceRegistry, StorageError};
use gwlink::app::model::{DeviceInfo, EndpointInfo, truncated};
use gwlink::storage::{Descriptor, FileBackend, encode_blob};
use gwlink::stores::{DeviceStore, ProjectSettings, SettingsStore, devices};

fn info(uid: &str, button: bool) -> DeviceInfo {
    DeviceInfo {
        uid: truncated(uid),
        short_addr: 0x0101,
        has_button: button,
        ..DeviceInfo::default()
    }
}

#[test]
fn device_store_persists_to_files() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = DeviceStore::init(FileBackend::new(dir.path())).unwrap();
        store.upsert_device(&info("0xA1", true)).unwrap();
        store
            .upsert_endpoint(&EndpointInfo {
                uid: truncated("0xA1"),
                endpoint: 1,
                ..EndpointInfo::default()
            })
            .unwrap();
    }
    assert!(dir.path().join("devices.bin").exists());

    let store = DeviceStore::init(FileBackend::new(dir.path())).unwrap();
    let d = store.get("0xA1").unwrap();
    assert_eq!(d.name.as_str(), "switch1");
    assert_eq!(d.endpoints.len(), 1);
}

#[test]
fn device_store_capacity_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let store = DeviceStore::init(FileBackend::new(dir.path())).unwrap();
    for i in 0..devices::MAX_DEVICES {
        store.upsert_device(&info(&format!("0x{i:04X}"), false)).unwrap();
    }
    assert_eq!(
        store.upsert(devices::DeviceRecord::new("0xFFFF", 1)),
        Err(StorageError::Full)
    );
    // Existing devices still update.
    store.set_name("0x0000", "Porch").unwrap();
}

#[test]
fn foreign_blob_is_discarded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let other = Descriptor {
        magic: 0x1234_5678,
        ..devices::DESCRIPTOR
    };
    let blob = encode_blob(&other, &[devices::DeviceRecord::new("0xA1", 1)]);
    std::fs::write(dir.path().join("devices.bin"), blob).unwrap();

    let store = DeviceStore::init(FileBackend::new(dir.path())).unwrap();
    assert_eq!(store.count(), 0);
}

#[test]
fn truncated_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let mut blob = encode_blob(
        &devices::DESCRIPTOR,
        &[devices::DeviceRecord::new("0xA1", 1)],
    );
    blob.truncate(blob.len() - 10);
    std::fs::write(dir.path().join("devices.bin"), blob).unwrap();
    assert!(matches!(
        DeviceStore::init(FileBackend::new(dir.path())),
        Err(StorageError::Corrupt)
    ));
}

#[test]
fn settings_live_next_to_devices() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SettingsStore::init(FileBackend::new(dir.path())).unwrap();
    let custom = ProjectSettings {
        weather_success_interval_ms: 30 * 60 * 1000,
        ..ProjectSettings::default()
    };
    settings.set(custom).unwrap();
    let _devices = DeviceStore::init(FileBackend::new(dir.path())).unwrap();

    let again = SettingsStore::init(FileBackend::new(dir.path())).unwrap();
    assert_eq!(again.get(), custom);
    assert!(dir.path().join("proj_settings.bin").exists());
}

#[test]
fn rejected_edits_leave_the_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = DeviceStore::init(FileBackend::new(dir.path())).unwrap();
    store.upsert_device(&info("0xA1", false)).unwrap();
    for ep in 1..=devices::MAX_ENDPOINTS as u8 {
        store
            .merge_endpoint(&EndpointInfo {
                uid: truncated("0xA1"),
                endpoint: ep,
                ..EndpointInfo::default()
            })
            .unwrap();
    }
    let file = dir.path().join("devices.bin");
    std::fs::remove_file(&file).unwrap();

    assert_eq!(store.set_name("0xFF", "Porch"), Err(StorageError::NotFound));
    assert_eq!(
        store.merge_endpoint(&EndpointInfo {
            uid: truncated("0xA1"),
            endpoint: 9,
            ..EndpointInfo::default()
        }),
        Err(StorageError::Full)
    );
    assert!(!file.exists());

    store.set_name("0xA1", "Porch").unwrap();
    assert!(file.exists());
}
