//! Machine lifecycle transitions applied by `refresh`.
//!
//! ```text
//! booting ──refresh──▶ running
//! stopped ──refresh──▶ running
//! running ──stop────▶ stopping ──refresh──▶ stopped
//! error   ──refresh──▶ (fails, stays error)
//! ```
//!
//! When boot-delay simulation is enabled the `running` transition completes
//! only after the delay. The delay is a deferred completion registered in
//! [`BootTimers`]; destroying the machine cancels it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::DriverError;
use crate::machine::{Machine, MachineId, MachineStatus};

/// Outcome of a single refresh.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshPlan {
    /// Fail with [`DriverError::MachineInErrorState`]; status unchanged.
    Failed,
    /// The machine has been destroyed; fail with
    /// [`DriverError::MachineNotFound`].
    Gone,
    /// Move to the status now.
    Settle(MachineStatus),
    /// Move to the status once the delay has elapsed.
    Delayed {
        /// Status reached after the delay.
        status: MachineStatus,
        /// Time to wait before settling.
        after: Duration,
    },
}

/// Decides the transition for a machine currently in `current`.
#[must_use]
pub const fn plan_refresh(current: MachineStatus, boot_delay: Option<Duration>) -> RefreshPlan {
    match (current, boot_delay) {
        (MachineStatus::Error, _) => RefreshPlan::Failed,
        (MachineStatus::Terminated, _) => RefreshPlan::Gone,
        (MachineStatus::Stopping, _) => RefreshPlan::Settle(MachineStatus::Stopped),
        (_, Some(after)) => RefreshPlan::Delayed {
            status: MachineStatus::Running,
            after,
        },
        (_, None) => RefreshPlan::Settle(MachineStatus::Running),
    }
}

/// Pending delayed transitions, keyed by machine.
#[derive(Debug, Default)]
pub struct BootTimers {
    pending: Mutex<HashMap<MachineId, CancellationToken>>,
}

impl BootTimers {
    /// Creates an empty timer table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for `delay` unless the machine's timers are cancelled first.
    ///
    /// Concurrent waits on the same machine share one cancellation token.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MachineNotFound`] when [`BootTimers::cancel`]
    /// is called for `id` before the delay elapses.
    pub async fn wait(&self, id: &MachineId, delay: Duration) -> Result<(), DriverError> {
        let token = self
            .pending
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .clone();

        let outcome = tokio::select! {
            () = token.cancelled() => Err(DriverError::MachineNotFound { id: id.clone() }),
            () = sleep(delay) => Ok(()),
        };

        let mut pending = self.pending.lock().await;
        if pending
            .get(id)
            .is_some_and(|current| current.is_cancelled() || outcome.is_ok())
        {
            pending.remove(id);
        }
        outcome
    }

    /// Cancels every pending wait for `id`.
    pub async fn cancel(&self, id: &MachineId) {
        if let Some(token) = self.pending.lock().await.remove(id) {
            debug!(machine_id = %id, "cancelled pending boot transition");
            token.cancel();
        }
    }

    /// Number of machines with a pending delayed transition.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Applies one refresh to `machine`.
///
/// # Errors
///
/// Returns [`DriverError::MachineInErrorState`] for machines in `error`,
/// and [`DriverError::MachineNotFound`] for terminated machines or when the
/// boot delay is cancelled.
pub async fn apply_refresh(
    mut machine: Machine,
    boot_delay: Option<Duration>,
    timers: &BootTimers,
) -> Result<Machine, DriverError> {
    let next = match plan_refresh(machine.status, boot_delay) {
        RefreshPlan::Failed => {
            return Err(DriverError::MachineInErrorState { id: machine.id });
        }
        RefreshPlan::Gone => return Err(DriverError::MachineNotFound { id: machine.id }),
        RefreshPlan::Settle(status) => status,
        RefreshPlan::Delayed { status, after } => {
            timers.wait(&machine.id, after).await?;
            status
        }
    };
    if machine.status != next {
        debug!(machine_id = %machine.id, from = %machine.status, to = %next, "machine transition");
    }
    machine.status = next;
    Ok(machine)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::machine::MachineRecord;
    use rstest::rstest;

    const DELAY: Duration = Duration::from_millis(500);

    fn machine(status: MachineStatus) -> Machine {
        MachineRecord {
            name: String::from("m"),
            ..MachineRecord::default()
        }
        .into_machine(status)
    }

    #[rstest]
    #[case(MachineStatus::Error, None, RefreshPlan::Failed)]
    #[case(MachineStatus::Error, Some(DELAY), RefreshPlan::Failed)]
    #[case(MachineStatus::Terminated, None, RefreshPlan::Gone)]
    #[case(MachineStatus::Stopping, None, RefreshPlan::Settle(MachineStatus::Stopped))]
    #[case(MachineStatus::Stopping, Some(DELAY), RefreshPlan::Settle(MachineStatus::Stopped))]
    #[case(MachineStatus::Booting, None, RefreshPlan::Settle(MachineStatus::Running))]
    #[case(MachineStatus::Stopped, None, RefreshPlan::Settle(MachineStatus::Running))]
    #[case(MachineStatus::Running, None, RefreshPlan::Settle(MachineStatus::Running))]
    #[case(
        MachineStatus::Booting,
        Some(DELAY),
        RefreshPlan::Delayed { status: MachineStatus::Running, after: DELAY }
    )]
    fn plan_follows_transition_table(
        #[case] current: MachineStatus,
        #[case] delay: Option<Duration>,
        #[case] expected: RefreshPlan,
    ) {
        assert_eq!(plan_refresh(current, delay), expected);
    }

    #[rstest]
    fn no_plan_leads_back_to_booting() {
        let statuses = [
            MachineStatus::Booting,
            MachineStatus::Running,
            MachineStatus::Stopping,
            MachineStatus::Stopped,
            MachineStatus::Error,
            MachineStatus::Terminated,
        ];
        for status in statuses {
            for delay in [None, Some(DELAY)] {
                let plan = plan_refresh(status, delay);
                assert!(
                    !matches!(
                        plan,
                        RefreshPlan::Settle(MachineStatus::Booting)
                            | RefreshPlan::Delayed {
                                status: MachineStatus::Booting,
                                ..
                            }
                    ),
                    "{status} must not return to booting"
                );
            }
        }
    }

    #[tokio::test]
    async fn error_refresh_fails_and_keeps_status() {
        let timers = BootTimers::new();
        let failed = machine(MachineStatus::Error);
        let err = apply_refresh(failed.clone(), None, &timers)
            .await
            .expect_err("error is terminal");
        assert_eq!(err, DriverError::MachineInErrorState { id: failed.id });
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_refresh_settles_only_after_delay() {
        let timers = Arc::new(BootTimers::new());
        let booting = machine(MachineStatus::Booting);
        let task_timers = Arc::clone(&timers);
        let started = tokio::time::Instant::now();
        let handle =
            tokio::spawn(async move { apply_refresh(booting, Some(DELAY), &task_timers).await });

        tokio::time::advance(DELAY - Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished(), "refresh settled before the delay");

        let refreshed = handle
            .await
            .expect("task joins")
            .expect("refresh succeeds");
        assert_eq!(refreshed.status, MachineStatus::Running);
        assert!(started.elapsed() >= DELAY);
        assert_eq!(timers.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_pending_boot() {
        let timers = Arc::new(BootTimers::new());
        let booting = machine(MachineStatus::Booting);
        let id = booting.id.clone();
        let task_timers = Arc::clone(&timers);
        let handle =
            tokio::spawn(async move { apply_refresh(booting, Some(DELAY), &task_timers).await });

        tokio::task::yield_now().await;
        assert_eq!(timers.pending().await, 1);
        timers.cancel(&id).await;

        let err = handle
            .await
            .expect("task joins")
            .expect_err("cancelled boot fails");
        assert_eq!(err, DriverError::MachineNotFound { id });
        assert_eq!(timers.pending().await, 0);
    }
}
