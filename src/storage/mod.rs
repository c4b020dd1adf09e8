//! Generic versioned record storage.
//!
//! A [`RecordSet`] keeps up to `max_items` fixed-size records in memory and
//! persists them as a single blob:
//!
//! ```text
//! ┌────────────┬──────────────┬────────────┬──────────────────────────┐
//! │ magic u32  │ version u16  │ count u16  │ count × item_size bytes  │
//! └────────────┴──────────────┴────────────┴──────────────────────────┘
//!   little-endian
//! ```
//!
//! A blob with the wrong magic or version is discarded and the set starts
//! empty. There is no migration path. A count above `max_items`, or a body
//! shorter than `count × item_size`, is [`StorageError::Corrupt`].
//!
//! Cache mutation happens inside one critical section per set; the backend
//! write happens outside it.

pub mod backend;

use core::cell::RefCell;
use std::sync::Mutex;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, info, warn};

pub use backend::{FileBackend, KvBackend, StorageBackend};

use crate::app::ports::StorageError;

/// Blob header length.
pub const HEADER_LEN: usize = 8;

/// A record with a fixed encoded size and a unique key.
pub trait FixedRecord: Clone + Send {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Identity used by upsert, get and remove.
    fn key(&self) -> &str;

    /// Write into `out`, which is exactly `SIZE` zeroed bytes.
    fn encode(&self, out: &mut [u8]);

    /// Read from `raw`, which is exactly `SIZE` bytes.
    fn decode(raw: &[u8]) -> Result<Self, StorageError>;
}

/// Where and how a record set is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Unique key within the namespace (file stem for file backends).
    pub key: &'static str,
    /// NVS namespace.
    pub namespace: &'static str,
    pub item_size: usize,
    pub max_items: usize,
    pub magic: u32,
    pub version: u16,
}

impl Descriptor {
    fn check<T: FixedRecord>(&self) -> Result<(), StorageError> {
        if self.key.is_empty()
            || self.namespace.is_empty()
            || self.max_items == 0
            || self.max_items > usize::from(u16::MAX)
            || self.item_size != T::SIZE
        {
            return Err(StorageError::InvalidDescriptor);
        }
        Ok(())
    }
}

/// Serialise `items` with the header for `desc`.
pub fn encode_blob<T: FixedRecord>(desc: &Descriptor, items: &[T]) -> Vec<u8> {
    let mut blob = vec![0u8; HEADER_LEN + items.len() * T::SIZE];
    blob[0..4].copy_from_slice(&desc.magic.to_le_bytes());
    blob[4..6].copy_from_slice(&desc.version.to_le_bytes());
    blob[6..8].copy_from_slice(&(items.len() as u16).to_le_bytes());
    for (item, out) in items.iter().zip(blob[HEADER_LEN..].chunks_exact_mut(T::SIZE)) {
        item.encode(out);
    }
    blob
}

/// Parse a persisted blob. A magic or version mismatch yields an empty set.
pub fn decode_blob<T: FixedRecord>(desc: &Descriptor, blob: &[u8]) -> Result<Vec<T>, StorageError> {
    if blob.len() < HEADER_LEN {
        warn!("storage: {} blob too short ({} bytes), starting empty", desc.key, blob.len());
        return Ok(Vec::new());
    }
    let magic = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    let version = u16::from_le_bytes([blob[4], blob[5]]);
    let count = usize::from(u16::from_le_bytes([blob[6], blob[7]]));

    if magic != desc.magic || version != desc.version {
        warn!(
            "storage: {} magic/version mismatch (0x{:08X} v{}, expected 0x{:08X} v{}), starting empty",
            desc.key, magic, version, desc.magic, desc.version
        );
        return Ok(Vec::new());
    }
    if count > desc.max_items {
        warn!("storage: {} count {} exceeds max {}", desc.key, count, desc.max_items);
        return Err(StorageError::Corrupt);
    }
    let body = &blob[HEADER_LEN..];
    if body.len() < count * T::SIZE {
        warn!(
            "storage: {} body truncated ({} < {})",
            desc.key,
            body.len(),
            count * T::SIZE
        );
        return Err(StorageError::Corrupt);
    }
    body.chunks_exact(T::SIZE).take(count).map(T::decode).collect()
}

/// An in-memory cache of records mirrored to a [`StorageBackend`].
pub struct RecordSet<T, B> {
    desc: Descriptor,
    cache: BlockingMutex<CriticalSectionRawMutex, RefCell<Vec<T>>>,
    backend: Mutex<B>,
}

impl<T: FixedRecord, B: StorageBackend> RecordSet<T, B> {
    /// Create the set and load whatever the backend holds.
    ///
    /// A missing blob or a magic/version mismatch is an empty set, not an
    /// error.
    pub fn init(desc: Descriptor, backend: B) -> Result<Self, StorageError> {
        let set = Self::new(desc, backend)?;
        let n = set.load()?;
        info!("storage: {} initialised ({}/{} items)", desc.key, n, desc.max_items);
        Ok(set)
    }

    /// Create an empty set without touching the backend.
    pub fn new(desc: Descriptor, backend: B) -> Result<Self, StorageError> {
        desc.check::<T>()?;
        Ok(Self {
            desc,
            cache: BlockingMutex::new(RefCell::new(Vec::with_capacity(desc.max_items))),
            backend: Mutex::new(backend),
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.desc
    }

    /// Reload the cache from the backend. Returns the item count.
    pub fn load(&self) -> Result<usize, StorageError> {
        let blob = {
            let backend = self.backend.lock().map_err(|_| StorageError::IoError)?;
            backend.read_blob(&self.desc)?
        };
        let items = match blob {
            Some(blob) => decode_blob::<T>(&self.desc, &blob)?,
            None => {
                warn!("storage: no persisted data for {}, starting empty", self.desc.key);
                Vec::new()
            }
        };
        let n = items.len();
        self.cache.lock(|c| *c.borrow_mut() = items);
        debug!("storage: {} loaded {} items", self.desc.key, n);
        Ok(n)
    }

    /// Persist the cache with one backend write.
    ///
    /// The backend lock is taken before the cache is encoded so concurrent
    /// savers land in cache order and the last write is never stale.
    pub fn save(&self) -> Result<(), StorageError> {
        let mut backend = self.backend.lock().map_err(|_| StorageError::IoError)?;
        let blob = self
            .cache
            .lock(|c| encode_blob(&self.desc, c.borrow().as_slice()));
        backend.write_blob(&self.desc, &blob).inspect_err(|e| {
            warn!("storage: {} save failed: {}", self.desc.key, e);
        })
    }

    /// Insert or replace by key, then persist.
    pub fn upsert(&self, item: T) -> Result<(), StorageError> {
        self.cache.lock(|c| {
            let mut items = c.borrow_mut();
            if let Some(slot) = items.iter_mut().find(|i| i.key() == item.key()) {
                *slot = item;
                return Ok(());
            }
            if items.len() >= self.desc.max_items {
                return Err(StorageError::Full);
            }
            items.push(item);
            Ok(())
        })?;
        self.save()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.cache
            .lock(|c| c.borrow().iter().find(|i| i.key() == key).cloned())
    }

    /// Remove by key, then persist.
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.cache.lock(|c| {
            let mut items = c.borrow_mut();
            let idx = items
                .iter()
                .position(|i| i.key() == key)
                .ok_or(StorageError::NotFound)?;
            items.remove(idx);
            Ok(())
        })?;
        self.save()
    }

    pub fn list(&self) -> Vec<T> {
        self.cache.lock(|c| c.borrow().clone())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.cache.lock(|c| c.borrow_mut().clear());
        self.save()
    }

    pub fn count(&self) -> usize {
        self.cache.lock(|c| c.borrow().len())
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.desc.max_items
    }

    pub fn find_by_index(&self, index: usize) -> Option<T> {
        self.cache.lock(|c| c.borrow().get(index).cloned())
    }

    /// Mutate the cache under the critical section, then persist.
    ///
    /// Items pushed past `max_items` are dropped before saving.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Result<R, StorageError> {
        let out = self.cache.lock(|c| {
            let mut items = c.borrow_mut();
            let out = f(&mut items);
            if items.len() > self.desc.max_items {
                warn!(
                    "storage: {} over capacity ({} > {}), truncating",
                    self.desc.key,
                    items.len(),
                    self.desc.max_items
                );
                items.truncate(self.desc.max_items);
            }
            out
        });
        self.save()?;
        Ok(out)
    }

    /// Like [`update`](Self::update) for fallible edits: persists only
    /// when `f` returns `Ok`.
    ///
    /// `f` must leave the items untouched when it fails.
    pub fn try_update<R>(
        &self,
        f: impl FnOnce(&mut Vec<T>) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let out = self.cache.lock(|c| f(&mut c.borrow_mut()))?;
        self.save()?;
        Ok(out)
    }

    /// Read the cache under the critical section.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.cache.lock(|c| f(c.borrow().as_slice()))
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        name: String,
        value: u32,
    }

    impl FixedRecord for Pair {
        const SIZE: usize = 12;

        fn key(&self) -> &str {
            &self.name
        }

        fn encode(&self, out: &mut [u8]) {
            let n = self.name.len().min(7);
            out[..n].copy_from_slice(&self.name.as_bytes()[..n]);
            out[8..12].copy_from_slice(&self.value.to_le_bytes());
        }

        fn decode(raw: &[u8]) -> Result<Self, StorageError> {
            let end = raw[..8].iter().position(|&b| b == 0).unwrap_or(8);
            let name = core::str::from_utf8(&raw[..end])
                .map_err(|_| StorageError::Corrupt)?
                .to_string();
            let value = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
            Ok(Self { name, value })
        }
    }

    fn pair(name: &str, value: u32) -> Pair {
        Pair {
            name: name.into(),
            value,
        }
    }

    const DESC: Descriptor = Descriptor {
        key: "pairs",
        namespace: "test",
        item_size: 12,
        max_items: 3,
        magic: 0x5041_4952,
        version: 2,
    };

    /// Backend over a shared map so a second set can observe what the
    /// first one persisted.
    #[derive(Clone, Default)]
    struct MemBackend(Arc<std::sync::Mutex<HashMap<&'static str, Vec<u8>>>>);

    impl StorageBackend for MemBackend {
        fn read_blob(&self, desc: &Descriptor) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.0.lock().unwrap().get(desc.key).cloned())
        }

        fn write_blob(&mut self, desc: &Descriptor, blob: &[u8]) -> Result<(), StorageError> {
            self.0.lock().unwrap().insert(desc.key, blob.to_vec());
            Ok(())
        }
    }

    /// Counts writes and makes each one slow enough for savers to overlap.
    #[derive(Clone, Default)]
    struct SlowBackend {
        mem: MemBackend,
        writes: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl StorageBackend for SlowBackend {
        fn read_blob(&self, desc: &Descriptor) -> Result<Option<Vec<u8>>, StorageError> {
            self.mem.read_blob(desc)
        }

        fn write_blob(&mut self, desc: &Descriptor, blob: &[u8]) -> Result<(), StorageError> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            self.mem.write_blob(desc, blob)
        }
    }

    #[test]
    fn missing_blob_starts_empty() {
        let set = RecordSet::<Pair, _>::init(DESC, MemBackend::default()).unwrap();
        assert_eq!(set.count(), 0);
        assert!(!set.is_full());
    }

    #[test]
    fn upsert_persists_and_reloads() {
        let mem = MemBackend::default();
        let set = RecordSet::<Pair, _>::init(DESC, mem.clone()).unwrap();
        set.upsert(pair("a", 1)).unwrap();
        set.upsert(pair("b", 2)).unwrap();
        set.upsert(pair("a", 10)).unwrap();

        let again = RecordSet::<Pair, _>::init(DESC, mem).unwrap();
        assert_eq!(again.list(), vec![pair("a", 10), pair("b", 2)]);
        assert_eq!(again.get("b"), Some(pair("b", 2)));
        assert_eq!(again.find_by_index(1), Some(pair("b", 2)));
        assert_eq!(again.find_by_index(2), None);
    }

    #[test]
    fn full_set_rejects_new_keys_but_accepts_updates() {
        let set = RecordSet::<Pair, _>::init(DESC, MemBackend::default()).unwrap();
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            set.upsert(pair(k, i as u32)).unwrap();
        }
        assert!(set.is_full());
        assert_eq!(set.upsert(pair("d", 9)), Err(StorageError::Full));
        assert_eq!(set.upsert(pair("c", 9)), Ok(()));
        assert_eq!(set.get("c").unwrap().value, 9);
    }

    #[test]
    fn remove_and_clear() {
        let set = RecordSet::<Pair, _>::init(DESC, MemBackend::default()).unwrap();
        set.upsert(pair("a", 1)).unwrap();
        assert_eq!(set.remove("zz"), Err(StorageError::NotFound));
        set.remove("a").unwrap();
        assert_eq!(set.count(), 0);
        set.upsert(pair("b", 1)).unwrap();
        set.clear().unwrap();
        assert!(set.list().is_empty());
    }

    #[test]
    fn header_layout_is_little_endian() {
        let blob = encode_blob(&DESC, &[pair("x", 0x0102_0304)]);
        assert_eq!(&blob[0..4], &0x5041_4952u32.to_le_bytes());
        assert_eq!(&blob[4..6], &[2, 0]);
        assert_eq!(&blob[6..8], &[1, 0]);
        assert_eq!(blob.len(), HEADER_LEN + 12);
        assert_eq!(&blob[16..20], &[4, 3, 2, 1]);
    }

    #[test]
    fn version_mismatch_is_absorbed_as_empty() {
        let mem = MemBackend::default();
        let old = Descriptor { version: 1, ..DESC };
        mem.0
            .lock()
            .unwrap()
            .insert("pairs", encode_blob(&old, &[pair("a", 1)]));
        let set = RecordSet::<Pair, _>::init(DESC, mem).unwrap();
        assert_eq!(set.count(), 0);
    }

    #[test]
    fn magic_mismatch_is_absorbed_as_empty() {
        let other = Descriptor { magic: 1, ..DESC };
        let blob = encode_blob(&other, &[pair("a", 1)]);
        assert_eq!(decode_blob::<Pair>(&DESC, &blob), Ok(Vec::new()));
    }

    #[test]
    fn count_above_max_is_corrupt() {
        let mut blob = encode_blob::<Pair>(&DESC, &[]);
        blob[6..8].copy_from_slice(&4u16.to_le_bytes());
        blob.extend_from_slice(&[0u8; 48]);
        assert_eq!(decode_blob::<Pair>(&DESC, &blob), Err(StorageError::Corrupt));

        let mem = MemBackend::default();
        mem.0.lock().unwrap().insert("pairs", blob);
        assert!(matches!(
            RecordSet::<Pair, _>::init(DESC, mem),
            Err(StorageError::Corrupt)
        ));
    }

    #[test]
    fn truncated_body_is_corrupt() {
        let mut blob = encode_blob(&DESC, &[pair("a", 1), pair("b", 2)]);
        blob.truncate(blob.len() - 1);
        assert_eq!(decode_blob::<Pair>(&DESC, &blob), Err(StorageError::Corrupt));
    }

    #[test]
    fn mismatched_item_size_is_rejected() {
        let bad = Descriptor { item_size: 8, ..DESC };
        assert!(matches!(
            RecordSet::<Pair, _>::init(bad, MemBackend::default()),
            Err(StorageError::InvalidDescriptor)
        ));
    }

    #[test]
    fn update_runs_under_lock_and_truncates_overflow() {
        let set = RecordSet::<Pair, _>::init(DESC, MemBackend::default()).unwrap();
        let pushed = set
            .update(|items| {
                for i in 0..5 {
                    items.push(pair(&format!("k{i}"), i));
                }
                items.len()
            })
            .unwrap();
        assert_eq!(pushed, 5);
        assert_eq!(set.count(), 3);
    }

    #[test]
    fn failed_try_update_does_not_write() {
        let backend = SlowBackend::default();
        let set = RecordSet::<Pair, _>::init(DESC, backend.clone()).unwrap();
        set.upsert(pair("a", 1)).unwrap();
        let writes = backend.writes.load(std::sync::atomic::Ordering::SeqCst);

        let r = set.try_update(|items| {
            items
                .iter_mut()
                .find(|p| p.name == "missing")
                .map(|p| p.value = 9)
                .ok_or(StorageError::NotFound)
        });
        assert_eq!(r, Err(StorageError::NotFound));
        assert_eq!(backend.writes.load(std::sync::atomic::Ordering::SeqCst), writes);

        set.try_update(|items| {
            items[0].value = 2;
            Ok(())
        })
        .unwrap();
        assert_eq!(backend.writes.load(std::sync::atomic::Ordering::SeqCst), writes + 1);
    }

    #[test]
    fn concurrent_savers_leave_the_latest_cache_on_disk() {
        const WIDE: Descriptor = Descriptor {
            max_items: 32,
            ..DESC
        };
        for _ in 0..5 {
            let backend = SlowBackend::default();
            let set = Arc::new(RecordSet::<Pair, _>::init(WIDE, backend.clone()).unwrap());
            let barrier = Arc::new(std::sync::Barrier::new(16));
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let set = set.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        set.upsert(pair(&format!("k{i}"), i)).unwrap();
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            let again = RecordSet::<Pair, _>::init(WIDE, backend.mem.clone()).unwrap();
            assert_eq!(again.count(), 16);
            assert_eq!(again.list(), set.list());
        }
    }
}
