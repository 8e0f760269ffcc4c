//! Settings persistence over a byte-block storage abstraction.
//!
//! Storage is a single fixed-slot byte block with an explicit commit, which
//! maps directly onto NVS on the device and onto an in-memory buffer in
//! tests. Loading never fails fatally: anything that does not decode to a
//! record carrying the validity sentinel leaves the device "unconfigured".

use std::fmt;

use log::{debug, info, warn};

use super::record::{generate_client_id, Settings};

/// Upper bound for a serialized settings record. The interpreter's
/// per-field value ceilings keep every record, even one with maximal
/// fields, inside this buffer.
pub const MAX_RECORD_BYTES: usize = 768;

/// Byte-block storage for the settings record.
pub trait ConfigStorage {
    /// Read the stored block into `buf`, returning the stored length, or
    /// `None` when nothing has ever been written.
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StorageError>;

    /// Replace the stored block.
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;

    /// Flush the written block to durable storage.
    fn commit(&mut self) -> Result<(), StorageError>;
}

/// Owns the settings record, its validity verdict, and the storage behind it.
pub struct SettingsStore<S: ConfigStorage> {
    storage: S,
    settings: Settings,
    valid: bool,
}

impl<S: ConfigStorage> SettingsStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            settings: Settings::factory_defaults(),
            valid: false,
        }
    }

    /// Load the record from storage, honoring the persisted validity marker.
    ///
    /// Missing, truncated, or corrupted storage all leave the device
    /// unconfigured with factory defaults in place.
    pub fn load(&mut self) {
        let mut buf = [0u8; MAX_RECORD_BYTES];
        let stored = match self.storage.read(&mut buf) {
            Ok(Some(len)) => &buf[..len],
            Ok(None) => {
                info!("No stored settings, device not configured");
                self.valid = false;
                return;
            }
            Err(e) => {
                warn!("Failed to read stored settings: {}", e);
                self.valid = false;
                return;
            }
        };

        match Settings::from_bytes(stored) {
            Ok((settings, true)) => {
                self.settings = settings;
                self.valid = true;
                debug!("Loaded configuration values from storage");
            }
            Ok((settings, false)) => {
                // Keep the partial record so prior command input survives a
                // reboot even before the configuration is complete.
                self.settings = settings;
                self.valid = false;
                info!("Skipping stored settings, device not configured");
            }
            Err(e) => {
                self.valid = false;
                info!("Stored settings unreadable ({}), device not configured", e);
            }
        }
    }

    /// Recompute the validity marker, persist the record, and commit.
    ///
    /// The client id is not user-settable, so an empty one is regenerated
    /// here before the write.
    pub fn save(&mut self) -> Result<(), StorageError> {
        self.valid = self.settings.is_complete();
        if self.valid {
            debug!("Settings deemed complete");
        } else {
            debug!("Settings still incomplete");
        }

        if self.settings.client_id.is_empty() {
            self.settings.client_id = generate_client_id();
        }

        let bytes = self.settings.to_bytes(self.valid);
        self.storage.write(&bytes)?;
        self.storage.commit()
    }

    /// Overwrite every field with factory defaults and regenerate the
    /// client id. Does not persist and does not mark the record valid.
    pub fn reset(&mut self) {
        self.settings = Settings::factory_defaults();
        self.valid = false;
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// The persisted validity verdict, as of the last load or save.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The settings listing with the current validity line appended.
    pub fn listing(&self) -> String {
        self.settings.listing(self.valid)
    }
}

/// In-memory storage, used by tests and host runs.
#[derive(Default)]
pub struct MemoryStorage {
    block: Option<Vec<u8>>,
    committed: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with a raw block, as if written by a prior boot.
    pub fn with_block(block: Vec<u8>) -> Self {
        Self {
            block: Some(block),
            committed: true,
        }
    }

    pub fn block(&self) -> Option<&[u8]> {
        self.block.as_deref()
    }

    pub fn committed(&self) -> bool {
        self.committed
    }
}

impl ConfigStorage for MemoryStorage {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        match &self.block {
            Some(block) => {
                if block.len() > buf.len() {
                    return Err(StorageError::Read("stored block exceeds buffer".into()));
                }
                buf[..block.len()].copy_from_slice(block);
                Ok(Some(block.len()))
            }
            None => Ok(None),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.block = Some(data.to_vec());
        self.committed = false;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.committed = true;
        Ok(())
    }
}

/// Errors from the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    Read(String),
    Write(String),
    Commit(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(msg) => write!(f, "storage read failed: {}", msg),
            Self::Write(msg) => write!(f, "storage write failed: {}", msg),
            Self::Commit(msg) => write!(f, "storage commit failed: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}
