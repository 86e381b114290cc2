use std::path::Path;

use crate::secure_store::SecureStore;

use super::error::{LicenseError, LicenseResult};
use super::types::{ActivationRecord, TamperCheckState};

pub const STORE_FILE_NAME: &str = "secure.dat";

const ACTIVATION_KEY: &str = "activation";
const TRIAL_USED_KEY: &str = "trial_used";
const WATERMARK_KEY: &str = "time_watermark";

/// Persistence for the activation record, the trial-used marker and the
/// tamper watermark.
///
/// Every write stores a complete value; nothing is patched field by field.
pub struct EntitlementStore {
    secure: SecureStore,
    machine_id: String,
}

impl EntitlementStore {
    pub fn open(data_dir: &Path, machine_id: &str) -> Self {
        Self {
            secure: SecureStore::open(data_dir.join(STORE_FILE_NAME), machine_id),
            machine_id: machine_id.to_string(),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// Returns the stored record, or `None` if it is missing, unreadable,
    /// inconsistent or bound to a different machine.
    pub fn load(&self) -> Option<ActivationRecord> {
        let raw = match self.secure.secure_get(ACTIVATION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::debug!("No activation record found in secure store");
                return None;
            }
            Err(e) => {
                log::warn!("Failed to read activation record: {}", e);
                return None;
            }
        };

        let record: ActivationRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Stored activation record failed to decode: {}", e);
                return None;
            }
        };

        if record.machine_id != self.machine_id {
            log::warn!("Stored activation record belongs to another machine; ignoring it");
            return None;
        }
        if !record.is_consistent() {
            log::warn!("Stored activation record is inconsistent; ignoring it");
            return None;
        }

        Some(record)
    }

    pub fn save(&self, record: &ActivationRecord) -> LicenseResult<()> {
        let raw = serde_json::to_string(record)?;
        self.secure
            .secure_set(ACTIVATION_KEY, &raw)
            .map_err(LicenseError::Storage)?;
        log::info!("Activation record saved ({})", record.activation_type.as_str());
        Ok(())
    }

    /// Removes the activation record. Clearing an empty store is a no-op.
    pub fn clear(&self) -> LicenseResult<()> {
        self.secure
            .secure_delete(ACTIVATION_KEY)
            .map_err(LicenseError::Storage)?;
        log::info!("Activation record cleared");
        Ok(())
    }

    pub fn trial_used(&self) -> bool {
        self.secure.secure_has(TRIAL_USED_KEY)
    }

    pub fn mark_trial_used(&self) -> LicenseResult<()> {
        self.secure
            .secure_set(TRIAL_USED_KEY, "true")
            .map_err(LicenseError::Storage)
    }

    pub fn load_watermark(&self) -> Option<TamperCheckState> {
        match self.secure.secure_get(WATERMARK_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw)
                .map_err(|e| log::warn!("Time watermark failed to decode: {}", e))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to read time watermark: {}", e);
                None
            }
        }
    }

    pub fn save_watermark(&self, state: &TamperCheckState) -> LicenseResult<()> {
        let raw = serde_json::to_string(state)?;
        self.secure
            .secure_set(WATERMARK_KEY, &raw)
            .map_err(LicenseError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::types::ActivationType;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record_for(machine_id: &str) -> ActivationRecord {
        let at = Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap();
        ActivationRecord::trial("HT-7-ABCDEF12", machine_id, 7, at)
    }

    #[test]
    fn test_save_then_load_returns_same_record() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path(), "machine-a");
        let record = record_for("machine-a");

        store.save(&record).unwrap();
        assert_eq!(store.load(), Some(record));
    }

    #[test]
    fn test_foreign_record_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path(), "machine-a");

        store.save(&record_for("machine-b")).unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_inconsistent_record_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path(), "machine-a");
        let mut record = record_for("machine-a");
        record.trial_days = None;

        store.save(&record).unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_unactivated_record_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path(), "machine-a");
        let at = Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap();
        let mut record = ActivationRecord::full("HK-ABCDEF12-A-B-C", "machine-a", at);
        record.is_activated = false;
        record.activation_type = ActivationType::None;

        store.save(&record).unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_clear_is_idempotent_and_keeps_markers() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path(), "machine-a");
        store.save(&record_for("machine-a")).unwrap();
        store.mark_trial_used().unwrap();

        store.clear().unwrap();
        store.clear().unwrap();

        assert_eq!(store.load(), None);
        assert!(store.trial_used());
    }

    #[test]
    fn test_trial_marker_survives_reopen() {
        let dir = TempDir::new().unwrap();
        assert!(!EntitlementStore::open(dir.path(), "machine-a").trial_used());

        EntitlementStore::open(dir.path(), "machine-a")
            .mark_trial_used()
            .unwrap();
        assert!(EntitlementStore::open(dir.path(), "machine-a").trial_used());
    }

    #[test]
    fn test_watermark_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = EntitlementStore::open(dir.path(), "machine-a");
        assert_eq!(store.load_watermark(), None);

        let state = TamperCheckState {
            last_known_good_timestamp: Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap(),
        };
        store.save_watermark(&state).unwrap();
        assert_eq!(store.load_watermark(), Some(state));
    }
}
