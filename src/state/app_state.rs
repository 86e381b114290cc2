use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::LicenseConfig;
use crate::license::{
    EntitlementStateMachine, EntitlementStore, EntitlementTasks, HostMachineIdentity, LicenseApiClient,
    LicenseResult, MachineIdentityProvider, RemoteAuthority, SystemClock, TaskSchedule, Clock,
};

/// Process-wide state, constructed once at startup and passed to whoever needs it.
pub struct AppState {
    pub config: LicenseConfig,
    pub entitlement: EntitlementStateMachine,
    tasks: Mutex<Option<EntitlementTasks>>,
}

impl AppState {
    /// Wires the real host identity, the HTTP license client and the wall clock.
    pub fn new(config: LicenseConfig) -> LicenseResult<Self> {
        let remote = Arc::new(LicenseApiClient::new(&config.api_base_url, config.api_timeout)?);
        Self::with_parts(config, &HostMachineIdentity::new(), remote, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: LicenseConfig,
        identity: &dyn MachineIdentityProvider,
        remote: Arc<dyn RemoteAuthority>,
        clock: Arc<dyn Clock>,
    ) -> LicenseResult<Self> {
        let identity = identity.machine_info()?;
        let store = Arc::new(EntitlementStore::open(&config.data_dir, &identity.machine_id));
        let tolerance = chrono::Duration::from_std(config.tamper_tolerance)
            .unwrap_or_else(|_| chrono::Duration::seconds(crate::license::MIN_TOLERANCE_SECS));

        let entitlement = EntitlementStateMachine::new(identity, store, remote, clock, tolerance);
        let state = entitlement.initialize();
        log::info!("License state at startup: {:?}", state);

        Ok(Self {
            config,
            entitlement,
            tasks: Mutex::new(None),
        })
    }

    /// Starts the background checks. A second call while running is a no-op.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.lock_tasks();
        if tasks.as_ref().is_some_and(|t| t.is_running()) {
            log::debug!("License background tasks already running");
            return;
        }
        *tasks = Some(EntitlementTasks::start(
            self.entitlement.clone(),
            TaskSchedule::from(&self.config),
        ));
    }

    pub fn background_tasks_running(&self) -> bool {
        self.lock_tasks().as_ref().is_some_and(|t| t.is_running())
    }

    /// Cancels all background checks together, e.g. on logout.
    pub async fn stop_background_tasks(&self) {
        let tasks = self.lock_tasks().take();
        if let Some(tasks) = tasks {
            tasks.stop().await;
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Option<EntitlementTasks>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Recovering from poisoned mutex in AppState");
                poisoned.into_inner()
            }
        }
    }
}
