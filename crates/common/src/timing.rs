use std::time::{Duration, Instant};

/// Summary of the intervals measured so far.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingStats {
    pub count: u64,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
}

/// Stopwatch for measuring how long each control tick takes.
///
/// Owned by whoever runs the loop, never global.
#[derive(Debug, Clone, Default)]
pub struct TickTimer {
    started: Option<Instant>,
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
}

impl TickTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tic(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the interval opened by the last `tic`. Without one this
    /// measures nothing and returns zero.
    pub fn toc(&mut self) -> Duration {
        let Some(started) = self.started.take() else {
            return Duration::ZERO;
        };
        let elapsed = started.elapsed();
        self.add(elapsed);
        elapsed
    }

    pub fn add(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.max = self.max.max(elapsed);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn stats(&self) -> TimingStats {
        let mean = if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / u32::try_from(self.count).unwrap_or(u32::MAX)
        };
        TimingStats {
            count: self.count,
            mean,
            min: self.min.unwrap_or_default(),
            max: self.max,
        }
    }
}
