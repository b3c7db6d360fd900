use std::sync::atomic::{AtomicU64, Ordering};

/// Event counters shared by the control loop and whoever reports on it.
#[derive(Debug, Default)]
pub struct SharedDiagnostics {
    pub ticks: AtomicU64,
    pub latches: AtomicU64,
    pub releases: AtomicU64,
    pub late_ticks: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub failed_replies: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticsSnapshot {
    pub ticks: u64,
    pub latches: u64,
    pub releases: u64,
    pub late_ticks: u64,
    pub malformed_frames: u64,
    pub failed_replies: u64,
}

impl SharedDiagnostics {
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latch(&self) {
        self.latches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of late ticks including this one.
    pub fn record_late_tick(&self) -> u64 {
        self.late_ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_reply(&self) {
        self.failed_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            latches: self.latches.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            late_ticks: self.late_ticks.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            failed_replies: self.failed_replies.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counts_from_several_threads() {
        let diagnostics = Arc::new(SharedDiagnostics::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let d = diagnostics.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        d.record_tick();
                        d.record_malformed_frame();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = diagnostics.snapshot();
        assert_eq!(snap.ticks, 4_000);
        assert_eq!(snap.malformed_frames, 4_000);
        assert_eq!(diagnostics.record_late_tick(), 1);
        assert_eq!(diagnostics.record_late_tick(), 2);
    }
}
