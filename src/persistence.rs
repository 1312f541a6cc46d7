//! Persistence of totalizer state across restarts
//!
//! Both totals and their markers are loaded once at startup and written back
//! after every poll that changed them. The JSON document is keyed by
//! metering point so one file can carry several meters.

use crate::error::{HelmiError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::totalizer::{DailyTotalizerState, TotalizerState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const STATE_VERSION: u32 = 1;

/// Everything that must survive a restart for one metering point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterState {
    pub hourly: TotalizerState,
    pub daily: DailyTotalizerState,
}

/// Load/store contract for [`MeterState`]
pub trait StateStore: Send + Sync {
    /// State for `metering_point_id`; defaults when nothing was stored yet
    fn load(&self, metering_point_id: &str) -> Result<MeterState>;

    fn save(&self, metering_point_id: &str, state: &MeterState) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    meters: BTreeMap<String, MeterState>,
}

/// State kept in a JSON file, replaced atomically on every save
pub struct JsonFileStore {
    file_path: PathBuf,
    // Serializes read-modify-write cycles on the document
    lock: Mutex<()>,
    logger: StructuredLogger,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
            logger: get_logger("persistence"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn read_document(&self) -> Result<StateDocument> {
        if !self.file_path.exists() {
            return Ok(StateDocument::default());
        }
        let contents = std::fs::read_to_string(&self.file_path).map_err(|e| {
            HelmiError::persistence(format!("read {}: {e}", self.file_path.display()))
        })?;
        if contents.trim().is_empty() {
            return Ok(StateDocument::default());
        }
        serde_json::from_str(&contents).map_err(|e| {
            HelmiError::persistence(format!("parse {}: {e}", self.file_path.display()))
        })
    }

    fn write_document(&self, document: &StateDocument) -> Result<()> {
        let contents = serde_json::to_string_pretty(document)
            .map_err(|e| HelmiError::persistence(format!("encode state: {e}")))?;

        if let Some(parent) = self.file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                HelmiError::persistence(format!("create {}: {e}", parent.display()))
            })?;
        }

        let mut tmp_name = self.file_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        std::fs::write(&tmp_path, contents).map_err(|e| {
            HelmiError::persistence(format!("write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &self.file_path).map_err(|e| {
            HelmiError::persistence(format!("replace {}: {e}", self.file_path.display()))
        })
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, metering_point_id: &str) -> Result<MeterState> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| HelmiError::persistence("state lock poisoned"))?;
        let document = self.read_document()?;
        match document.meters.get(metering_point_id) {
            Some(state) => {
                self.logger.info(&format!(
                    "Loaded state for {metering_point_id} (total {:.3})",
                    state.hourly.total
                ));
                Ok(state.clone())
            }
            None => {
                self.logger
                    .info(&format!("No stored state for {metering_point_id}, using defaults"));
                Ok(MeterState::default())
            }
        }
    }

    fn save(&self, metering_point_id: &str, state: &MeterState) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| HelmiError::persistence("state lock poisoned"))?;
        let mut document = self.read_document()?;
        document.version = STATE_VERSION;
        document
            .meters
            .insert(metering_point_id.to_string(), state.clone());
        self.write_document(&document)?;
        self.logger
            .debug(&format!("Saved state for {metering_point_id}"));
        Ok(())
    }
}

/// Process-local store for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, MeterState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, metering_point_id: &str) -> Result<MeterState> {
        let states = self
            .states
            .lock()
            .map_err(|_| HelmiError::persistence("state lock poisoned"))?;
        Ok(states.get(metering_point_id).cloned().unwrap_or_default())
    }

    fn save(&self, metering_point_id: &str, state: &MeterState) -> Result<()> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| HelmiError::persistence("state lock poisoned"))?;
        states.insert(metering_point_id.to_string(), state.clone());
        Ok(())
    }
}
