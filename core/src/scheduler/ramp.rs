//! Even spreading of spawn and despawn events over a ramp

use std::time::Duration;
use tokio::time::Instant;

/// Schedule moving the population from one size to another
///
/// With `n` events over `over`, event `k` (1-based) becomes due at
/// `over * k / n`. The scheduler asks for the due events on every tick and
/// caps each batch at its burst limit; events held back by the cap stay due
/// and are issued on the following ticks.
#[derive(Debug, Clone)]
pub struct RampPlan {
    from: usize,
    to: usize,
    over: Duration,
    started: Instant,
    issued: usize,
}

impl RampPlan {
    /// Plan a ramp starting at `started`
    pub fn new(from: usize, to: usize, over: Duration, started: Instant) -> Self {
        Self {
            from,
            to,
            over,
            started,
            issued: 0,
        }
    }

    /// Plan that holds the current population
    pub fn hold(users: usize, started: Instant) -> Self {
        Self::new(users, users, Duration::ZERO, started)
    }

    /// Target population
    pub fn target(&self) -> usize {
        self.to
    }

    /// Whether the ramp adds users
    pub fn is_up(&self) -> bool {
        self.to > self.from
    }

    /// Number of spawn or despawn events in the ramp
    pub fn total(&self) -> usize {
        self.from.abs_diff(self.to)
    }

    /// Events issued so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// When the last event is due
    pub fn ends_at(&self) -> Instant {
        self.started + self.over
    }

    /// Number of events due after `elapsed`
    pub fn due_by(&self, elapsed: Duration) -> usize {
        let total = self.total();
        if total == 0 || elapsed >= self.over {
            return total;
        }
        let due = elapsed.as_nanos() * total as u128 / self.over.as_nanos();
        (due as usize).min(total)
    }

    /// Take the events due at `now`, at most `max_burst` of them
    pub fn next_batch(&mut self, now: Instant, max_burst: usize) -> usize {
        let due = self.due_by(now.saturating_duration_since(self.started));
        let batch = due.saturating_sub(self.issued).min(max_burst);
        self.issued += batch;
        batch
    }

    /// Whether every event was issued
    pub fn is_complete(&self) -> bool {
        self.issued >= self.total()
    }
}
