use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopwatchState {
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug)]
struct Timing {
    state: StopwatchState,
    started_at: Option<Instant>,
    accumulated: Option<Duration>,
    elapsed: Option<Duration>,
}

impl Timing {
    fn sample(&mut self, now: Instant) -> Option<Duration> {
        if let Some(started_at) = self.started_at {
            let current = now.saturating_duration_since(started_at);
            self.elapsed = Some(current + self.accumulated.unwrap_or_default());
        }
        self.elapsed
    }

    fn freeze(&mut self, now: Instant) {
        self.sample(now);
        if self.elapsed.is_some() {
            self.accumulated = self.elapsed;
        }
        self.started_at = None;
    }
}

/// Measures active elapsed time; paused intervals are not counted.
///
/// While running, a background tick samples the elapsed time and publishes it
/// to subscribers. The tick only exists inside a tokio runtime; `elapsed()`
/// samples on read either way.
#[derive(Debug)]
pub struct Stopwatch {
    tick_interval: Duration,
    timing: Arc<Mutex<Timing>>,
    elapsed_tx: Arc<watch::Sender<Option<Duration>>>,
    ticker: Option<JoinHandle<()>>,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl Stopwatch {
    #[must_use]
    pub fn new(tick_interval: Duration) -> Self {
        let (elapsed_tx, _) = watch::channel(None);
        Self {
            tick_interval: tick_interval.max(MIN_TICK_INTERVAL),
            timing: Arc::new(Mutex::new(Timing {
                state: StopwatchState::Idle,
                started_at: None,
                accumulated: None,
                elapsed: None,
            })),
            elapsed_tx: Arc::new(elapsed_tx),
            ticker: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> StopwatchState {
        self.timing.lock().state
    }

    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let mut timing = self.timing.lock();
        if timing.state == StopwatchState::Running {
            timing.sample(Instant::now())
        } else {
            timing.elapsed
        }
    }

    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Duration>> {
        self.elapsed_tx.subscribe()
    }

    /// Starts timing on top of whatever was accumulated before.
    pub fn start(&mut self) {
        {
            let mut timing = self.timing.lock();
            if timing.state == StopwatchState::Running {
                return;
            }
            timing.started_at = Some(Instant::now());
            timing.state = StopwatchState::Running;
        }
        self.spawn_ticker();
    }

    /// Drops any accumulated time and starts again from zero.
    pub fn restart(&mut self) {
        {
            let mut timing = self.timing.lock();
            timing.accumulated = None;
            timing.elapsed = Some(Duration::ZERO);
            timing.started_at = Some(Instant::now());
            timing.state = StopwatchState::Running;
        }
        self.elapsed_tx.send_replace(Some(Duration::ZERO));
        self.spawn_ticker();
    }

    pub fn pause(&mut self) -> bool {
        {
            let mut timing = self.timing.lock();
            if timing.state != StopwatchState::Running {
                return false;
            }

            timing.freeze(Instant::now());
            timing.state = StopwatchState::Paused;
            self.elapsed_tx.send_replace(timing.elapsed);
        }
        self.cancel_ticker();
        true
    }

    pub fn resume(&mut self) -> bool {
        {
            let mut timing = self.timing.lock();
            if timing.state != StopwatchState::Paused {
                return false;
            }
            timing.started_at = Some(Instant::now());
            timing.state = StopwatchState::Running;
        }
        self.spawn_ticker();
        true
    }

    /// Freezes the elapsed value and cancels the tick.
    pub fn stop(&mut self) {
        {
            let mut timing = self.timing.lock();
            if timing.state == StopwatchState::Running {
                timing.freeze(Instant::now());
            }
            timing.state = StopwatchState::Stopped;
            self.elapsed_tx.send_replace(timing.elapsed);
        }
        self.cancel_ticker();
    }

    /// Stops and forgets every measured value.
    pub fn reset(&mut self) {
        self.stop();
        let mut timing = self.timing.lock();
        timing.state = StopwatchState::Idle;
        timing.accumulated = None;
        timing.elapsed = None;
        self.elapsed_tx.send_replace(None);
    }

    fn spawn_ticker(&mut self) {
        if self
            .ticker
            .as_ref()
            .is_some_and(|ticker| !ticker.is_finished())
        {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        let timing = Arc::clone(&self.timing);
        let elapsed_tx = Arc::clone(&self.elapsed_tx);
        let period = self.tick_interval;
        self.ticker = Some(runtime.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let elapsed = timing.lock().sample(Instant::now());
                elapsed_tx.send_replace(elapsed);
            }
        }));
    }

    fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        self.cancel_ticker();
    }
}
