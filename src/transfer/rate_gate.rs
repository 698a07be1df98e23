//! Process-wide request rate limiter.
//!
//! Token-per-interval: every [`RateGate::take`] is granted one slot, slots
//! are spaced a fixed interval apart, and callers queue on the gate's mutex
//! in arrival order. One gate instance per logical remote endpoint is
//! enough; all workers share it.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Token-per-interval rate gate.
#[derive(Debug)]
pub struct RateGate {
    /// Spacing between granted slots. Zero disables the gate.
    interval: Duration,
    /// The next free slot. Holding the lock across the wait serializes
    /// takers, which is what spaces the grants.
    next_slot: Mutex<Instant>,
}

impl RateGate {
    /// Gate granting `events_per_sec` slots per second. Zero disables
    /// limiting entirely.
    #[must_use]
    pub fn new(events_per_sec: u32) -> Self {
        let interval = if events_per_sec == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / events_per_sec
        };
        debug!(interval_us = interval.as_micros() as u64, "rate gate created");
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Blocks until the caller's slot arrives.
    pub async fn take(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        if *next_slot > now {
            tokio::time::sleep_until(*next_slot).await;
            *next_slot += self.interval;
        } else {
            *next_slot = now + self.interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_take_is_immediate() {
        let gate = RateGate::new(100);
        let start = Instant::now();
        gate.take().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_takes_are_spaced_by_interval() {
        let gate = RateGate::new(100); // 10ms interval
        let start = Instant::now();
        for _ in 0..5 {
            gate.take().await;
        }
        // First slot free, four more spaced 10ms apart.
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(start.elapsed() < Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_disables_gate() {
        let gate = RateGate::new(0);
        let start = Instant::now();
        for _ in 0..100 {
            gate.take().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_takers_share_the_budget() {
        use std::sync::Arc;

        let gate = Arc::new(RateGate::new(100));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.take().await;
            }));
        }
        for handle in handles {
            handle.await.expect("taker task");
        }
        // Four takers across tasks still consume one slot each.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
