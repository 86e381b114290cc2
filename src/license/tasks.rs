use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::entitlement::EntitlementStateMachine;
use crate::config::LicenseConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    TrialExpiry,
    TamperCheck,
    Heartbeat,
    RemotePoll,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::TrialExpiry => "trial-expiry",
            TaskKind::TamperCheck => "tamper-check",
            TaskKind::Heartbeat => "heartbeat",
            TaskKind::RemotePoll => "remote-poll",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSchedule {
    pub trial_check: Duration,
    pub tamper_check: Duration,
    pub heartbeat: Duration,
    pub remote_poll: Duration,
}

impl From<&LicenseConfig> for TaskSchedule {
    fn from(config: &LicenseConfig) -> Self {
        Self {
            trial_check: config.trial_check_interval,
            tamper_check: config.tamper_check_interval,
            heartbeat: config.heartbeat_interval,
            remote_poll: config.remote_poll_interval,
        }
    }
}

/// The license background tasks, started and stopped as one group.
///
/// Must be started from within a tokio runtime. Dropping the group cancels
/// every task.
pub struct EntitlementTasks {
    handles: Vec<(TaskKind, JoinHandle<()>)>,
}

impl EntitlementTasks {
    pub fn start(machine: EntitlementStateMachine, schedule: TaskSchedule) -> Self {
        let handles = vec![
            (
                TaskKind::TrialExpiry,
                spawn_periodic(TaskKind::TrialExpiry, schedule.trial_check, machine.clone(), |m| async move {
                    m.check_trial_expiration();
                }),
            ),
            (
                TaskKind::TamperCheck,
                spawn_periodic(TaskKind::TamperCheck, schedule.tamper_check, machine.clone(), |m| async move {
                    m.check_time_manipulation();
                }),
            ),
            (
                TaskKind::Heartbeat,
                spawn_periodic(TaskKind::Heartbeat, schedule.heartbeat, machine.clone(), |m| async move {
                    m.send_heartbeat().await;
                }),
            ),
            (
                TaskKind::RemotePoll,
                spawn_periodic(TaskKind::RemotePoll, schedule.remote_poll, machine, |m| async move {
                    m.poll_remote().await;
                }),
            ),
        ];
        log::info!("Started {} license background tasks", handles.len());
        Self { handles }
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|(_, handle)| !handle.is_finished())
    }

    pub fn running_tasks(&self) -> Vec<TaskKind> {
        self.handles
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Cancels every task and waits for them to wind down.
    pub async fn stop(mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
        for (kind, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    log::warn!("License task '{}' ended abnormally: {}", kind.name(), e);
                }
            }
        }
        log::info!("License background tasks stopped");
    }
}

impl Drop for EntitlementTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }
}

/// Runs `tick` immediately and then every `period`. Overdue ticks are skipped, not queued.
fn spawn_periodic<F, Fut>(
    kind: TaskKind,
    period: Duration,
    machine: EntitlementStateMachine,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(EntitlementStateMachine) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            log::debug!("License task '{}' tick", kind.name());
            tick(machine.clone()).await;
        }
    })
}
