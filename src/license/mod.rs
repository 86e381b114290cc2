pub mod api_client;
pub mod clock;
pub mod codes;
pub mod device;
pub mod entitlement;
pub mod error;
pub mod store;
pub mod tamper;
pub mod tasks;
pub mod types;

pub use api_client::{LicenseApiClient, RemoteAuthority};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codes::{machine_hash, validate_full, validate_trial, ActivationCode, TrialGrant};
pub use device::{HostMachineIdentity, MachineIdentityProvider, StaticMachineIdentity};
pub use entitlement::EntitlementStateMachine;
pub use error::{ErrorKind, LicenseError, LicenseResult};
pub use store::EntitlementStore;
pub use tamper::{TamperDetector, MIN_TOLERANCE_SECS};
pub use tasks::{EntitlementTasks, TaskKind, TaskSchedule};
pub use types::*;
