// Periodic poll loop for one view: fire now, then every period, until stopped.
// Cycles may overlap; whichever completes last is applied last.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Identifies one poll cycle: the activation epoch it was started in plus a
/// sequence number for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTicket {
    epoch: u64,
    seq: u64,
}

impl CycleTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// What happened to a cycle's result once it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied,
    /// Fetch failed; error flag set, cached data untouched.
    Failed,
    /// Ticket was stale on arrival; nothing touched.
    Discarded,
}

/// Activation epoch for one view's state. Lives under the same lock as the
/// state it guards, so admission and mutation happen together.
#[derive(Debug, Default)]
pub struct EpochGate {
    epoch: u64,
    active: bool,
    next_seq: u64,
}

impl EpochGate {
    pub fn activate(&mut self) {
        self.epoch += 1;
        self.active = true;
    }

    /// Every ticket issued so far becomes stale.
    pub fn deactivate(&mut self) {
        self.epoch += 1;
        self.active = false;
    }

    /// Stales every ticket issued so far; an active gate stays active.
    pub fn invalidate(&mut self) {
        if self.active {
            self.epoch += 1;
        }
    }

    pub fn ticket(&mut self) -> CycleTicket {
        self.next_seq += 1;
        CycleTicket { epoch: self.epoch, seq: self.next_seq }
    }

    pub fn admits(&self, ticket: &CycleTicket) -> bool {
        self.active && ticket.epoch == self.epoch
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Something a scheduler can drive.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn activate(&self);

    /// After this returns, no cycle begun earlier may mutate state.
    fn deactivate(&self);

    /// Captures a ticket; called on the tick, before the fetch starts.
    fn begin_cycle(&self) -> CycleTicket;

    /// Fetch, normalise and apply, if the ticket is still current on arrival.
    async fn run_cycle(&self, ticket: CycleTicket) -> CycleOutcome;
}

pub struct Scheduler {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    target: Arc<dyn PollTarget>,
}

impl Scheduler {
    /// Activates `target` and starts ticking. Must be called inside a tokio runtime.
    pub fn start(target: Arc<dyn PollTarget>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        target.activate();
        info!(view = target.name(), period_ms = period.as_millis() as u64, "starting poll loop");

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let loop_target = Arc::clone(&target);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let ticket = loop_target.begin_cycle();
                        trace!(view = loop_target.name(), seq = ticket.seq(), "tick");
                        // Detached: the next tick does not wait for this one.
                        let cycle_target = Arc::clone(&loop_target);
                        tokio::spawn(async move {
                            cycle_target.run_cycle(ticket).await;
                        });
                    }
                }
            }
            debug!(view = loop_target.name(), "poll loop exited");
        });

        Self { cancel, task: Some(task), target }
    }

    /// Stops future ticks and marks in-flight cycles stale. In-flight
    /// requests are not aborted; their results are ignored on arrival.
    pub fn stop(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.target.deactivate();
        self.task.take();
        info!(view = self.target.name(), "poll loop stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn record_outcome(view: &'static str, outcome: CycleOutcome) {
    match outcome {
        CycleOutcome::Applied => metrics::counter!("tickwatch_cycles_applied_total", "view" => view).increment(1),
        CycleOutcome::Failed => metrics::counter!("tickwatch_cycles_failed_total", "view" => view).increment(1),
        CycleOutcome::Discarded => metrics::counter!("tickwatch_cycles_discarded_total", "view" => view).increment(1),
    }
}
