//! NVS-backed settings storage.
//!
//! The whole record lives under a single key in its own namespace, so a
//! factory reset or layout change never touches other NVS users.

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_sys::EspError;

use super::store::{ConfigStorage, StorageError};

/// NVS namespace for the reporter's settings.
const NVS_NAMESPACE: &str = "tankreporter";

/// NVS key for the serialized settings record.
const NVS_KEY: &str = "settings";

/// Settings storage in the default NVS partition.
pub struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStorage {
    /// Open (creating if needed) the reporter's NVS namespace.
    pub fn new() -> Result<Self, EspError> {
        let partition = EspNvsPartition::<NvsDefault>::take()?;
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }
}

impl ConfigStorage for NvsStorage {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        match self.nvs.get_raw(NVS_KEY, buf) {
            Ok(Some(bytes)) => Ok(Some(bytes.len())),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Read(format!("{:?}", e))),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.nvs
            .set_raw(NVS_KEY, data)
            .map(|_| ())
            .map_err(|e| StorageError::Write(format!("{:?}", e)))
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        // NVS flushes on set_raw; there is no separate commit step to fail.
        Ok(())
    }
}
