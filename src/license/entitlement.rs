//! The entitlement orchestrator.
//!
//! `EntitlementStateMachine` owns the lifecycle (unactivated, trial, full,
//! expired, revoked, locked) and is the only thing the rest of the app asks
//! "may we run?". It is constructed once at startup and handed to whoever
//! needs it; clones share the same state.
//!
//! Trust rules:
//! - a new code is only accepted after the remote authority confirms it;
//! - an existing entitlement survives any remote failure and only ends on an
//!   explicit revocation;
//! - clock rollback past the tolerance locks the session.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::api_client::RemoteAuthority;
use super::clock::Clock;
use super::codes::{mask_code, ActivationCode};
use super::error::{LicenseError, LicenseResult};
use super::store::EntitlementStore;
use super::tamper::TamperDetector;
use super::types::*;
use crate::state_machine::{EntitlementLifecycle, EntitlementState};

const EVENT_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct EntitlementStateMachine {
    inner: Arc<Shared>,
}

struct Shared {
    identity: MachineIdentity,
    store: Arc<EntitlementStore>,
    remote: Arc<dyn RemoteAuthority>,
    tamper: TamperDetector,
    clock: Arc<dyn Clock>,
    session: Mutex<Session>,
    events: broadcast::Sender<EntitlementEvent>,
    in_flight: InFlight,
}

/// In-memory mirror of the stored record plus per-session flags.
struct Session {
    lifecycle: EntitlementLifecycle,
    record: Option<ActivationRecord>,
    last_verified_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    /// Set when clearing the store failed; retried on the next check.
    pending_clear: bool,
}

#[derive(Default)]
struct InFlight {
    activation: AtomicBool,
    trial_check: AtomicBool,
    tamper_check: AtomicBool,
    heartbeat: AtomicBool,
    remote_poll: AtomicBool,
}

/// Held while a task runs; a second caller finds the flag taken and skips.
struct TaskGuard<'a>(&'a AtomicBool);

impl<'a> TaskGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EntitlementStateMachine {
    pub fn new(
        identity: MachineIdentity,
        store: Arc<EntitlementStore>,
        remote: Arc<dyn RemoteAuthority>,
        clock: Arc<dyn Clock>,
        tamper_tolerance: Duration,
    ) -> Self {
        if store.machine_id() != identity.machine_id {
            log::warn!("Entitlement store opened for a different machine id");
        }
        let tamper = TamperDetector::new(store.clone(), clock.clone(), tamper_tolerance);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Shared {
                identity,
                store,
                remote,
                tamper,
                clock,
                session: Mutex::new(Session {
                    lifecycle: EntitlementLifecycle::new(),
                    record: None,
                    last_verified_at: None,
                    last_heartbeat_at: None,
                    pending_clear: false,
                }),
                events,
                in_flight: InFlight::default(),
            }),
        }
    }

    /// Restores the persisted entitlement at startup.
    pub fn initialize(&self) -> EntitlementState {
        if self.check_time_manipulation().manipulated {
            return self.current_state();
        }

        let record = self.inner.store.load();
        {
            let mut session = self.lock_session();
            session.record = None;
            match record.and_then(|r| r.granted_state().map(|state| (r, state))) {
                None => session.lifecycle.restore(EntitlementState::Unactivated),
                Some((record, state)) => {
                    log::info!(
                        "Restored {} activation {}",
                        record.activation_type.as_str(),
                        mask_code(&record.activation_code)
                    );
                    session.lifecycle.restore(state);
                    session.record = Some(record);
                }
            }
        }

        self.check_trial_expiration()
    }

    pub fn machine_info(&self) -> &MachineIdentity {
        &self.inner.identity
    }

    pub fn store(&self) -> &EntitlementStore {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntitlementEvent> {
        self.inner.events.subscribe()
    }

    /// The current state, after expiring a lapsed trial.
    pub fn current_state(&self) -> EntitlementState {
        self.check_trial_expiration()
    }

    pub fn is_entitled(&self) -> bool {
        self.current_state().is_entitled()
    }

    /// Whole trial days left; 0 outside a trial.
    pub fn days_remaining(&self) -> i64 {
        let state = self.check_trial_expiration();
        if state != EntitlementState::TrialActive {
            return 0;
        }
        let session = self.lock_session();
        session
            .record
            .as_ref()
            .map(|record| trial_days_left(record, self.inner.clock.now()))
            .unwrap_or(0)
    }

    pub fn activation_record(&self) -> Option<ActivationRecord> {
        self.lock_session().record.clone()
    }

    pub fn status(&self) -> LicenseStatus {
        let state = self.check_trial_expiration();
        let now = self.inner.clock.now();
        let session = self.lock_session();
        let record = session.record.as_ref();

        LicenseStatus {
            status: state,
            trial_days_left: (state == EntitlementState::TrialActive)
                .then(|| record.map(|r| trial_days_left(r, now)).unwrap_or(0)),
            license_type: record.map(|r| r.activation_type.as_str().to_string()),
            activation_code: record.map(|r| mask_code(&r.activation_code)),
            activated_at: record.map(|r| r.activation_date),
            expires_at: record.and_then(trial_ends_at),
        }
    }

    pub fn last_verified_at(&self) -> Option<DateTime<Utc>> {
        self.lock_session().last_verified_at
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.lock_session().last_heartbeat_at
    }

    /// Validates `raw_code` locally, confirms it remotely and persists the activation.
    ///
    /// Remote failures are reported to the caller; a new code is never accepted offline.
    pub async fn activate(&self, raw_code: &str) -> LicenseResult<LicenseStatus> {
        let _guard = TaskGuard::try_acquire(&self.inner.in_flight.activation)
            .ok_or_else(|| LicenseError::Rejected("an activation is already in progress".to_string()))?;

        if self.check_time_manipulation().manipulated {
            return Err(LicenseError::Tamper);
        }

        let machine_id = self.inner.identity.machine_id.clone();
        let code = ActivationCode::parse(raw_code, &machine_id)?;
        log::info!(
            "Activating {} license {}",
            code.activation_type().as_str(),
            mask_code(code.as_str())
        );

        if let ActivationCode::Trial { .. } = code {
            if self.inner.store.trial_used() {
                log::warn!("Trial activation refused: trial already used on this machine");
                return Err(LicenseError::TrialAlreadyUsed);
            }
            if self.current_state() == EntitlementState::FullActive {
                return Err(LicenseError::AlreadyLicensed);
            }
        }

        let response = self
            .inner
            .remote
            .verify(code.as_str(), &machine_id)
            .await
            .map_err(|e| {
                log::error!("Activation could not be confirmed remotely: {}", e);
                match e {
                    LicenseError::Network(msg) => LicenseError::Network(format!(
                        "could not reach the license server ({}); activation requires an internet connection",
                        msg
                    )),
                    other => other,
                }
            })?;

        if response.deactivated {
            return Err(LicenseError::Revoked(
                response
                    .message
                    .unwrap_or_else(|| "this code has been deactivated".to_string()),
            ));
        }
        if !response.confirms(code.activation_type()) {
            return Err(LicenseError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "the license server did not accept this code".to_string()),
            ));
        }

        let now = self.inner.clock.now();
        let (record, next_state) = match &code {
            ActivationCode::Full { code } => (
                ActivationRecord::full(code, &machine_id, now),
                EntitlementState::FullActive,
            ),
            ActivationCode::Trial { code, days } => (
                ActivationRecord::trial(code, &machine_id, *days, now),
                EntitlementState::TrialActive,
            ),
        };

        {
            let mut session = self.lock_session();
            let current = session.lifecycle.current();
            if !EntitlementLifecycle::is_valid_transition(current, next_state) {
                return Err(LicenseError::Rejected(format!(
                    "cannot activate while {:?}",
                    current
                )));
            }
            if record.is_trial {
                self.inner.store.mark_trial_used()?;
            }
            self.inner.store.save(&record)?;
            if let Err(e) = session.lifecycle.transition_to(next_state) {
                return Err(LicenseError::Rejected(e.to_string()));
            }

            session.record = Some(record);
            session.pending_clear = false;
            session.last_verified_at = Some(now);
            session.last_heartbeat_at = None;
        }

        log::info!("License activated: {:?}", next_state);
        Ok(self.status())
    }

    /// Expires a lapsed trial. Safe to call repeatedly.
    pub fn check_trial_expiration(&self) -> EntitlementState {
        let Some(_guard) = TaskGuard::try_acquire(&self.inner.in_flight.trial_check) else {
            return self.lock_session().lifecycle.current();
        };

        let now = self.inner.clock.now();
        let mut session = self.lock_session();
        self.retry_pending_clear(&mut session);

        if session.lifecycle.current() == EntitlementState::TrialActive {
            let expired = session
                .record
                .as_ref()
                .map(|record| trial_expired(record, now))
                .unwrap_or(true);
            if expired {
                log::info!("Trial period has ended");
                self.end_session(&mut session, EntitlementState::TrialExpired, EntitlementEvent::TrialExpired);
            }
        }
        session.lifecycle.current()
    }

    /// Runs the tamper detector and locks the session on clock rollback.
    pub fn check_time_manipulation(&self) -> TamperCheck {
        let Some(_guard) = TaskGuard::try_acquire(&self.inner.in_flight.tamper_check) else {
            return TamperCheck { manipulated: false };
        };

        let check = self.inner.tamper.check_time_manipulation();
        if check.manipulated {
            let mut session = self.lock_session();
            self.end_session(&mut session, EntitlementState::Locked, EntitlementEvent::Locked);
        }
        check
    }

    /// Re-verifies the current code. Remote failures keep the entitlement.
    pub async fn poll_remote(&self) -> EntitlementState {
        let Some(_guard) = TaskGuard::try_acquire(&self.inner.in_flight.remote_poll) else {
            return self.lock_session().lifecycle.current();
        };

        let state = self.check_trial_expiration();
        let Some(code) = self.entitled_code() else {
            return state;
        };

        let machine_id = &self.inner.identity.machine_id;
        let response = match self.inner.remote.verify(&code, machine_id).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Remote license check failed, keeping current entitlement: {}", e);
                return state;
            }
        };

        let mut session = self.lock_session();
        // The session may have changed while the request was in flight
        let still_current = session
            .record
            .as_ref()
            .is_some_and(|record| record.activation_code == code)
            && session.lifecycle.current().is_entitled();
        if !still_current {
            return session.lifecycle.current();
        }

        if response.is_revocation() {
            let message = response
                .message
                .unwrap_or_else(|| "license is no longer valid".to_string());
            log::warn!("License {} revoked remotely: {}", mask_code(&code), message);
            self.end_session(&mut session, EntitlementState::Revoked, EntitlementEvent::Revoked { message });
        } else if response.success {
            session.last_verified_at = Some(self.inner.clock.now());
        } else {
            log::warn!(
                "License server reported a failure ({}); keeping current entitlement",
                response.message.as_deref().unwrap_or("no message")
            );
        }
        session.lifecycle.current()
    }

    /// Best-effort usage ping. Failures are logged only.
    pub async fn send_heartbeat(&self) {
        let Some(_guard) = TaskGuard::try_acquire(&self.inner.in_flight.heartbeat) else {
            return;
        };
        let Some(code) = self.entitled_code() else {
            return;
        };

        let identity = &self.inner.identity;
        match self
            .inner
            .remote
            .heartbeat(&code, &identity.machine_id, &identity.computer_name)
            .await
        {
            Ok(()) => {
                let mut session = self.lock_session();
                if session.lifecycle.current().is_entitled() {
                    session.last_heartbeat_at = Some(self.inner.clock.now());
                }
            }
            Err(e) => log::warn!("License heartbeat failed: {}", e),
        }
    }

    /// Clears the activation and returns to `Unactivated`. The trial marker and
    /// time watermark are kept.
    pub fn reset(&self) -> LicenseResult<()> {
        let mut session = self.lock_session();
        self.inner.store.clear()?;
        session.pending_clear = false;
        Self::clear_session(&mut session);
        if let Err(e) = session.lifecycle.transition_to(EntitlementState::Unactivated) {
            log::error!("Reset failed: {}", e);
        }
        log::info!("Entitlement reset");
        Ok(())
    }

    fn entitled_code(&self) -> Option<String> {
        let session = self.lock_session();
        if !session.lifecycle.current().is_entitled() {
            return None;
        }
        session.record.as_ref().map(|r| r.activation_code.clone())
    }

    /// Moves into a terminal state, clearing storage and session. A repeat is a no-op.
    fn end_session(&self, session: &mut Session, state: EntitlementState, event: EntitlementEvent) {
        if session.lifecycle.current() == state {
            return;
        }
        if let Err(e) = session.lifecycle.transition_to(state) {
            log::error!("{}", e);
            return;
        }

        if let Err(e) = self.inner.store.clear() {
            log::error!("Failed to clear activation record, will retry: {}", e);
            session.pending_clear = true;
        }
        Self::clear_session(session);

        if self.inner.events.send(event).is_err() {
            log::debug!("No listeners for entitlement event");
        }
    }

    fn clear_session(session: &mut Session) {
        session.record = None;
        session.last_verified_at = None;
        session.last_heartbeat_at = None;
    }

    fn retry_pending_clear(&self, session: &mut Session) {
        if !session.pending_clear {
            return;
        }
        match self.inner.store.clear() {
            Ok(()) => session.pending_clear = false,
            Err(e) => log::warn!("Retrying activation record clear failed: {}", e),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        match self.inner.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Recovering from poisoned mutex in EntitlementStateMachine");
                poisoned.into_inner()
            }
        }
    }
}

fn trial_ends_at(record: &ActivationRecord) -> Option<DateTime<Utc>> {
    match (record.trial_start_date, record.trial_days) {
        (Some(start), Some(days)) => Some(start + Duration::days(days as i64)),
        _ => None,
    }
}

fn trial_expired(record: &ActivationRecord, now: DateTime<Utc>) -> bool {
    trial_ends_at(record).map_or(true, |ends| now >= ends)
}

/// `trialDays - floor(elapsed / 1 day)`, clamped to `[0, trialDays]`.
fn trial_days_left(record: &ActivationRecord, now: DateTime<Utc>) -> i64 {
    let (Some(start), Some(days)) = (record.trial_start_date, record.trial_days) else {
        return 0;
    };
    let elapsed_days = (now - start).num_milliseconds().max(0) / Duration::days(1).num_milliseconds();
    (days as i64 - elapsed_days).clamp(0, days as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_days_left_counts_whole_days() {
        let record = ActivationRecord::trial("HT-5-X", "m", 5, start());
        assert_eq!(trial_days_left(&record, start()), 5);
        assert_eq!(trial_days_left(&record, start() + Duration::hours(23)), 5);
        assert_eq!(trial_days_left(&record, start() + Duration::days(1)), 4);
        assert_eq!(trial_days_left(&record, start() + Duration::days(4)), 1);
        assert_eq!(trial_days_left(&record, start() + Duration::days(5)), 0);
        assert_eq!(trial_days_left(&record, start() + Duration::days(50)), 0);
    }

    #[test]
    fn test_days_left_never_exceeds_grant() {
        let record = ActivationRecord::trial("HT-5-X", "m", 5, start());
        assert_eq!(trial_days_left(&record, start() - Duration::minutes(1)), 5);
    }

    #[test]
    fn test_expiry_boundary() {
        let record = ActivationRecord::trial("HT-5-X", "m", 5, start());
        assert!(!trial_expired(&record, start() + Duration::days(5) - Duration::milliseconds(1)));
        assert!(trial_expired(&record, start() + Duration::days(5)));
    }

    #[test]
    fn test_task_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = TaskGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(TaskGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(TaskGuard::try_acquire(&flag).is_some());
    }
}
