//! Output pacing
//!
//! The multiplexer takes a deadline at the start of every tick and sleeps
//! until it once the packet is written, so packets leave no faster than
//! one per frame period. Write time is absorbed into the period; a write
//! that overruns it makes the tick late and the next one starts at once.

use std::time::{Duration, Instant};

use crate::utils::sos::SignalOfStop;

#[derive(Debug)]
pub struct FramePacer {
    period: Duration,
    ticks: u64,
    late_ticks: u64,
}

impl FramePacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ticks: 0,
            late_ticks: 0,
        }
    }

    pub fn with_framerate(framerate: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / framerate))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start a tick and return its deadline
    pub fn begin_tick(&mut self) -> Instant {
        self.ticks += 1;
        Instant::now() + self.period
    }

    /// Sleep until `deadline`. Returns `true` if the run was stopped first.
    pub fn wait_until(&mut self, deadline: Instant, stop: &SignalOfStop) -> bool {
        let mut now = Instant::now();
        if now >= deadline {
            self.late_ticks += 1;
            return stop.cancelled();
        }
        // condvar waits may wake early
        while now < deadline {
            if stop.wait_timeout(deadline - now) {
                return true;
            }
            now = Instant::now();
        }
        false
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks whose work outlasted the period
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ticks_are_spaced_by_period() {
        let mut pacer = FramePacer::new(Duration::from_millis(10));
        let stop = SignalOfStop::new();

        let start = Instant::now();
        for _ in 0..5 {
            let deadline = pacer.begin_tick();
            assert!(!pacer.wait_until(deadline, &stop));
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(pacer.ticks(), 5);
        assert_eq!(pacer.late_ticks(), 0);
    }

    #[test]
    fn test_overrun_tick_is_late() {
        let mut pacer = FramePacer::new(Duration::from_millis(1));
        let stop = SignalOfStop::new();

        let deadline = pacer.begin_tick();
        thread::sleep(Duration::from_millis(5));
        assert!(!pacer.wait_until(deadline, &stop));
        assert_eq!(pacer.late_ticks(), 1);
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let mut pacer = FramePacer::with_framerate(0.1);
        assert_eq!(pacer.period(), Duration::from_secs(10));
        let stop = SignalOfStop::new();

        let trigger = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            trigger.cancel();
        });

        let start = Instant::now();
        let deadline = pacer.begin_tick();
        assert!(pacer.wait_until(deadline, &stop));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
