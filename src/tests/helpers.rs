//! Shared fixtures for the license scenario tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::LicenseConfig;
use crate::license::api_client::MockRemoteAuthority;
use crate::license::{
    machine_hash, ActivationRecord, ActivationType, EntitlementStateMachine, EntitlementStore,
    MachineIdentity, ManualClock, VerifyResponse,
};

pub const MACHINE_ID: &str = "5d41402abc4b2a76b9719d911017c592";
pub const COMPUTER_NAME: &str = "front-counter";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap()
}

pub fn trial_code(days: u32) -> String {
    format!("HT-{}-{}", days, machine_hash(MACHINE_ID))
}

pub fn full_code() -> String {
    format!("HK-{}-7F3A-19QX-K2LM", machine_hash(MACHINE_ID))
}

pub fn confirmed(activation_type: ActivationType) -> VerifyResponse {
    VerifyResponse {
        success: true,
        valid: true,
        activation_type,
        deactivated: false,
        message: None,
    }
}

pub fn deactivated(message: &str) -> VerifyResponse {
    VerifyResponse {
        success: true,
        valid: false,
        activation_type: ActivationType::Full,
        deactivated: true,
        message: Some(message.to_string()),
    }
}

pub fn config_in(dir: &TempDir) -> LicenseConfig {
    LicenseConfig {
        data_dir: dir.path().to_path_buf(),
        ..LicenseConfig::default()
    }
}

/// An entitlement state machine over a temp store and a manual clock.
pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub store: Arc<EntitlementStore>,
    pub machine: EntitlementStateMachine,
}

impl Harness {
    pub fn new(remote: MockRemoteAuthority) -> Self {
        Self::build(remote, None)
    }

    /// Starts from a record already on disk, as after an app restart.
    pub fn with_record(remote: MockRemoteAuthority, record: ActivationRecord) -> Self {
        Self::build(remote, Some(record))
    }

    fn build(remote: MockRemoteAuthority, record: Option<ActivationRecord>) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start_time()));
        let store = Arc::new(EntitlementStore::open(dir.path(), MACHINE_ID));
        if let Some(record) = record {
            store.save(&record).unwrap();
        }

        let machine = EntitlementStateMachine::new(
            MachineIdentity {
                machine_id: MACHINE_ID.to_string(),
                computer_name: COMPUTER_NAME.to_string(),
            },
            store.clone(),
            Arc::new(remote),
            clock.clone(),
            Duration::seconds(120),
        );
        machine.initialize();

        Self {
            dir,
            clock,
            store,
            machine,
        }
    }
}

pub fn full_record() -> ActivationRecord {
    ActivationRecord::full(&full_code(), MACHINE_ID, start_time() - Duration::days(30))
}

pub fn trial_record(days: u32, started: DateTime<Utc>) -> ActivationRecord {
    ActivationRecord::trial(&trial_code(days), MACHINE_ID, days, started)
}
