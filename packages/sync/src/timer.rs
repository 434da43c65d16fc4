//! Countdown and broadcast-guard deadlines
//!
//! A single owned timer resource per coordination loop. Nothing here spawns
//! a task: the loop asks for the next deadline and sleeps on it inside its
//! own `select!`, so dropping the loop drops every pending timer with it.

use tokio::time::{Duration, Instant};

const TICK: Duration = Duration::from_secs(1);

/// Which deadline fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// One second of the visible countdown has passed
    CountdownTick,
    /// The pending-broadcast guard window is over
    GuardRelease,
}

#[derive(Debug, Clone, Default)]
pub struct SessionTimers {
    next_tick: Option<Instant>,
    guard_release: Option<Instant>,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking one second from now, replacing any running countdown
    pub fn arm_countdown(&mut self) {
        self.next_tick = Some(Instant::now() + TICK);
    }

    pub fn disarm_countdown(&mut self) {
        self.next_tick = None;
    }

    pub fn countdown_armed(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn arm_guard(&mut self, window: Duration) {
        self.guard_release = Some(Instant::now() + window);
    }

    pub fn release_guard(&mut self) {
        self.guard_release = None;
    }

    pub fn guard_armed(&self) -> bool {
        self.guard_release.is_some()
    }

    /// Drop every pending deadline
    pub fn clear(&mut self) {
        self.next_tick = None;
        self.guard_release = None;
    }

    /// Earliest pending deadline
    pub fn next(&self) -> Option<(Instant, TimerEvent)> {
        let tick = self.next_tick.map(|at| (at, TimerEvent::CountdownTick));
        let guard = self.guard_release.map(|at| (at, TimerEvent::GuardRelease));

        match (tick, guard) {
            (Some(t), Some(g)) => Some(if g.0 < t.0 { g } else { t }),
            (t, g) => t.or(g),
        }
    }

    /// Record that `event` fired at its deadline `at`
    ///
    /// Ticks are rescheduled from the deadline rather than from now, so a
    /// slow loop iteration does not stretch the countdown.
    pub fn fired(&mut self, event: TimerEvent, at: Instant) {
        match event {
            TimerEvent::CountdownTick => self.next_tick = Some(at + TICK),
            TimerEvent::GuardRelease => self.guard_release = None,
        }
    }
}

/// Sleep until `next`, or forever when nothing is pending
pub async fn sleep_until_next(next: Option<(Instant, TimerEvent)>) -> (Instant, TimerEvent) {
    match next {
        Some((at, event)) => {
            tokio::time::sleep_until(at).await;
            (at, event)
        }
        None => std::future::pending().await,
    }
}
