//! Persistence backends for [`RecordSet`](super::RecordSet).
//!
//! | Backend       | Medium                          | Atomicity               |
//! |---------------|---------------------------------|-------------------------|
//! | `KvBackend`   | any [`StoragePort`] (NVS)       | per-commit (port)       |
//! | `FileBackend` | `<root>/<key>.bin` on a FS      | temp file + rename      |

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::Descriptor;
use crate::app::ports::{StorageError, StoragePort};

/// Reads and writes whole record-set blobs.
pub trait StorageBackend: Send {
    /// `Ok(None)` when nothing has been persisted yet.
    fn read_blob(&self, desc: &Descriptor) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the persisted blob atomically.
    fn write_blob(&mut self, desc: &Descriptor, blob: &[u8]) -> Result<(), StorageError>;
}

// ── Key/value port ───────────────────────────────────────────

/// Stores each set under `desc.namespace` / `desc.key` of a [`StoragePort`].
pub struct KvBackend<S> {
    port: S,
}

impl<S: StoragePort> KvBackend<S> {
    pub fn new(port: S) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &S {
        &self.port
    }
}

impl<S: StoragePort + Send> StorageBackend for KvBackend<S> {
    fn read_blob(&self, desc: &Descriptor) -> Result<Option<Vec<u8>>, StorageError> {
        let len = match self.port.len(desc.namespace, desc.key) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut buf = vec![0u8; len];
        let n = self.port.read(desc.namespace, desc.key, &mut buf)?;
        buf.truncate(n);
        Ok(Some(buf))
    }

    fn write_blob(&mut self, desc: &Descriptor, blob: &[u8]) -> Result<(), StorageError> {
        self.port.write(desc.namespace, desc.key, blob)
    }
}

// ── Filesystem ───────────────────────────────────────────────

/// Stores each set as `<root>/<key>.bin`.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Default mount point of the data partition on the device.
    pub const DEVICE_ROOT: &'static str = "/data";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, desc: &Descriptor) -> PathBuf {
        self.root.join(format!("{}.bin", desc.key))
    }
}

fn io_err(e: &io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound,
        io::ErrorKind::StorageFull => StorageError::Full,
        _ => StorageError::IoError,
    }
}

impl StorageBackend for FileBackend {
    fn read_blob(&self, desc: &Descriptor) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path(desc);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("storage: read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!("storage: cannot read {}: {}", path.display(), e);
                Err(io_err(&e))
            }
        }
    }

    fn write_blob(&mut self, desc: &Descriptor, blob: &[u8]) -> Result<(), StorageError> {
        let path = self.path(desc);
        let tmp = self.root.join(format!("{}.bin.tmp", desc.key));
        let write = || -> io::Result<()> {
            fs::create_dir_all(&self.root)?;
            let mut f = fs::File::create(&tmp)?;
            f.write_all(blob)?;
            f.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            warn!("storage: cannot write {}: {}", path.display(), e);
            let _ = fs::remove_file(&tmp);
            io_err(&e)
        })
    }
}

// ── Tests ────────────────────────────────────────────────────
