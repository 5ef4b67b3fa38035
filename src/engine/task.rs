use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::engine::machine::{StockMachine, TickReport};
use crate::report;
use crate::state::MachineStateStore;
use crate::types::MachineState;

/// How long to wait before the next tick may start.
///
/// Measured from the start of the last committed tick. A tick that overran
/// the period gives zero, never a negative wait. A clock reading earlier
/// than the last tick waits one full period.
pub fn pacing_delay(period: Duration, last_tick_ms: i64, now_ms: i64) -> Duration {
    let elapsed = now_ms.saturating_sub(last_tick_ms);
    if elapsed < 0 {
        return period;
    }
    period.saturating_sub(Duration::from_millis(elapsed as u64))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStatus {
    /// No scheduler record exists.
    Empty,
    /// The record says the machine is off. Nothing ran.
    Disabled,
    Ticked(TickReport),
}

/// Runs paced, committed ticks. Ticks never overlap: both drivers run
/// them one after another on the calling task.
pub struct TickDriver {
    machine: Arc<StockMachine>,
    state: Arc<MachineStateStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    // Optional poll of the state record for writes made outside this process.
    poll: Option<Duration>,
}

impl TickDriver {
    pub fn new(
        machine: Arc<StockMachine>,
        state: Arc<MachineStateStore>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            machine,
            state,
            clock,
            period,
            poll: None,
        }
    }

    pub fn with_poll(mut self, every: Duration) -> Self {
        self.poll = Some(every);
        self
    }

    /// Check, pace, tick, commit.
    pub async fn run_tick(&self) -> Result<TickStatus> {
        match self.gate().await? {
            Gate::Skip(status) => Ok(status),
            Gate::Ready(wait) => {
                pace(wait).await;
                self.execute().await
            }
        }
    }

    /// Reads the record and works out the pacing delay. Does no work.
    async fn gate(&self) -> Result<Gate> {
        let Some(state) = self.state.load().await? else {
            info!("machine state is empty");
            return Ok(Gate::Skip(TickStatus::Empty));
        };
        if !state.enabled {
            info!("machine is disabled");
            return Ok(Gate::Skip(TickStatus::Disabled));
        }
        let now = self.clock.now().timestamp_millis();
        Ok(Gate::Ready(pacing_delay(self.period, state.last_tick, now)))
    }

    /// One pass plus the `last_tick` commit. Not cancelled once started.
    async fn execute(&self) -> Result<TickStatus> {
        // The record may have been disabled while we were pacing.
        match self.state.load().await? {
            None => return Ok(TickStatus::Empty),
            Some(s) if !s.enabled => {
                info!("machine disabled before tick started");
                return Ok(TickStatus::Disabled);
            }
            Some(_) => {}
        }

        // One timestamp for the whole tick: every price and the commit.
        let started = self.clock.now();
        let report = self.machine.on_tick(started).await;
        let started_ms = started.timestamp_millis();
        self.state.commit_tick(started_ms).await?;
        report::log_tick(started_ms, &report);

        Ok(TickStatus::Ticked(report))
    }

    /// Timer driver. Runs `limit` ticks, or forever when `limit` is `None`.
    /// Stops early when the machine is disabled. Returns ticks committed.
    ///
    /// An unreadable or unwritable state record is logged and retried after
    /// one period; it never ends the loop.
    pub async fn run_loop(&self, limit: Option<u64>) -> Result<u64> {
        if let Err(e) = self.seed().await {
            warn!("machine state not seeded: {e:#}");
        }

        let mut done = 0u64;
        while limit.is_none_or(|n| done < n) {
            match self.run_tick().await {
                Ok(TickStatus::Ticked(_)) => done += 1,
                Ok(TickStatus::Disabled | TickStatus::Empty) => break,
                Err(e) => {
                    warn!("tick skipped: {e:#}");
                    time::sleep(self.period).await;
                }
            }
        }
        info!(ticks = done, "tick loop finished");
        Ok(done)
    }

    /// Write-triggered driver. Each write to the scheduler record runs one
    /// tick, and that tick's own commit re-arms the next. A disabled machine
    /// idles until the record is written again. State errors are logged and
    /// the trigger dropped. Returns once `shutdown` resolves; a tick already
    /// running finishes first.
    pub async fn run_watch<F>(&self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        let mut rx = self.state.subscribe();
        // The record as it stands counts as the first trigger.
        rx.mark_changed();
        tokio::pin!(shutdown);

        let mut poll = self.poll.map(time::interval);
        let mut done = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let wait = match self.gate().await {
                        Ok(Gate::Ready(wait)) => wait,
                        Ok(Gate::Skip(_)) => continue,
                        Err(e) => {
                            warn!("trigger skipped: {e:#}");
                            continue;
                        }
                    };
                    // Shutdown may cut the pacing wait short, never the tick.
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        _ = pace(wait) => {}
                    }
                    match self.execute().await {
                        Ok(TickStatus::Ticked(_)) => done += 1,
                        Ok(_) => {}
                        Err(e) => warn!("tick not committed: {e:#}"),
                    }
                }
                _ = tick_opt(&mut poll) => {
                    // Publishes to `rx` if the record changed outside this process.
                    if let Err(e) = self.state.load().await {
                        warn!("state poll failed: {e:#}");
                    }
                }
            }
        }

        info!(ticks = done, "watch driver stopped");
        Ok(done)
    }

    /// Writes an enabled record if there is none yet.
    async fn seed(&self) -> Result<()> {
        if self.state.load().await?.is_none() {
            self.state.save(MachineState::enabled()).await?;
        }
        Ok(())
    }
}

enum Gate {
    Skip(TickStatus),
    Ready(Duration),
}

async fn pace(wait: Duration) {
    if !wait.is_zero() {
        debug!(wait_ms = wait.as_millis() as u64, "pacing");
        time::sleep(wait).await;
    }
}

async fn tick_opt(interval: &mut Option<time::Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}
