//! Frame sampling.
//!
//! `SampleScheduler` decides which frames reach the detector:
//! - Count-based (video, camera): every K-th frame read, positions K, 2K, 3K...
//!   A still image has a single frame, so it is always processed.
//! - Time-based (single captures): only once `interval` has passed since the last
//!   forwarded frame. The loop waits for the gate in bounded `poll` steps.
//!
//! Decisions are pure functions of a `SampleContext`. Time comes from a `Clock`
//! so tests can run the time gate without sleeping.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::StreamError;
use crate::ingest::SourceKind;

pub const DEFAULT_STRIDE: u64 = 1;
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(2_000);
pub const DEFAULT_POLL: Duration = Duration::from_millis(50);

/// Source of monotonic time and sleeping.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Hand-driven clock for tests. Sleeping advances time instantly.
#[derive(Clone, Debug)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    now: Instant,
    slept: Duration,
    sleeps: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: Instant::now(),
                slept: Duration::ZERO,
                sleeps: 0,
            })),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.now += duration;
        }
    }

    /// Total simulated sleep time.
    pub fn slept(&self) -> Duration {
        self.state.lock().map(|s| s.slept).unwrap_or_default()
    }

    /// Number of sleep calls.
    pub fn sleeps(&self) -> u64 {
        self.state.lock().map(|s| s.sleeps).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state
            .lock()
            .map(|s| s.now)
            .unwrap_or_else(|poisoned| poisoned.into_inner().now)
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.now += duration;
            state.slept += duration;
            state.sleeps += 1;
        }
    }
}

/// Inputs to a sampling decision.
#[derive(Clone, Copy, Debug)]
pub struct SampleContext {
    /// 1-based count of frames read this session, including the current one.
    pub frame_index: u64,
    pub now: Instant,
    pub last_sample_at: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplePolicy {
    EveryNth { stride: u64 },
    MinInterval { interval: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleScheduler {
    policy: SamplePolicy,
    poll: Duration,
}

impl SampleScheduler {
    pub fn every_nth(stride: u64) -> Result<Self> {
        if stride == 0 {
            return Err(StreamError::InvalidConfig("sampling stride must be >= 1".into()).into());
        }
        Ok(Self {
            policy: SamplePolicy::EveryNth { stride },
            poll: DEFAULT_POLL,
        })
    }

    pub fn min_interval(interval: Duration, poll: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(StreamError::InvalidConfig("sampling interval must be > 0".into()).into());
        }
        if poll.is_zero() {
            return Err(StreamError::InvalidConfig("poll step must be > 0".into()).into());
        }
        Ok(Self {
            policy: SamplePolicy::MinInterval { interval },
            poll,
        })
    }

    /// Pick the policy for a source kind.
    pub fn for_source(
        kind: SourceKind,
        stride: u64,
        interval: Duration,
        poll: Duration,
    ) -> Result<Self> {
        match kind {
            kind if kind.is_time_sampled() => Self::min_interval(interval, poll),
            // The stride is still validated so a bad config fails the same way.
            SourceKind::Image => Self::every_nth(stride).and(Self::every_nth(1)),
            _ => Self::every_nth(stride),
        }
    }

    pub fn policy(&self) -> SamplePolicy {
        self.policy
    }

    pub fn should_process(&self, ctx: &SampleContext) -> bool {
        match self.policy {
            SamplePolicy::EveryNth { stride } => {
                ctx.frame_index > 0 && ctx.frame_index % stride == 0
            }
            SamplePolicy::MinInterval { .. } => {
                self.remaining(ctx.now, ctx.last_sample_at).is_zero()
            }
        }
    }

    /// Time left before the time gate opens. Always zero for count-based policies.
    pub fn remaining(&self, now: Instant, last_sample_at: Option<Instant>) -> Duration {
        match (self.policy, last_sample_at) {
            (SamplePolicy::MinInterval { interval }, Some(last)) => {
                interval.saturating_sub(now.saturating_duration_since(last))
            }
            _ => Duration::ZERO,
        }
    }

    /// Sleep in steps of at most `poll` until the time gate opens.
    ///
    /// Returns false if `cancelled` reports true first.
    pub fn wait_until_due(
        &self,
        clock: &dyn Clock,
        last_sample_at: Option<Instant>,
        cancelled: impl Fn() -> bool,
    ) -> bool {
        loop {
            if cancelled() {
                return false;
            }
            let remaining = self.remaining(clock.now(), last_sample_at);
            if remaining.is_zero() {
                return true;
            }
            clock.sleep(remaining.min(self.poll));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(frame_index: u64, clock: &ManualClock, last: Option<Instant>) -> SampleContext {
        SampleContext {
            frame_index,
            now: clock.now(),
            last_sample_at: last,
        }
    }

    #[test]
    fn count_policy_selects_multiples_of_stride() -> Result<()> {
        let clock = ManualClock::new();
        for (stride, frames) in [(1u64, 10u64), (5, 100), (3, 10), (7, 6)] {
            let scheduler = SampleScheduler::every_nth(stride)?;
            let selected: Vec<u64> = (1..=frames)
                .filter(|&i| scheduler.should_process(&ctx(i, &clock, None)))
                .collect();
            assert_eq!(selected.len() as u64, frames / stride);
            assert!(selected.iter().all(|i| i % stride == 0));
        }
        Ok(())
    }

    #[test]
    fn zero_stride_is_invalid() {
        assert!(SampleScheduler::every_nth(0).is_err());
        assert!(SampleScheduler::min_interval(Duration::ZERO, DEFAULT_POLL).is_err());
    }

    #[test]
    fn time_policy_gates_on_interval() -> Result<()> {
        let clock = ManualClock::new();
        let scheduler = SampleScheduler::min_interval(Duration::from_secs(2), DEFAULT_POLL)?;
        assert!(scheduler.should_process(&ctx(1, &clock, None)));

        let last = clock.now();
        clock.advance(Duration::from_millis(1_999));
        assert!(!scheduler.should_process(&ctx(2, &clock, Some(last))));
        clock.advance(Duration::from_millis(1));
        assert!(scheduler.should_process(&ctx(2, &clock, Some(last))));
        Ok(())
    }

    #[test]
    fn wait_sleeps_in_bounded_steps() -> Result<()> {
        let clock = ManualClock::new();
        let scheduler =
            SampleScheduler::min_interval(Duration::from_millis(500), Duration::from_millis(100))?;
        let last = clock.now();

        assert!(scheduler.wait_until_due(&clock, Some(last), || false));
        assert_eq!(clock.slept(), Duration::from_millis(500));
        assert_eq!(clock.sleeps(), 5);
        Ok(())
    }

    #[test]
    fn wait_observes_cancellation() -> Result<()> {
        let clock = ManualClock::new();
        let scheduler = SampleScheduler::min_interval(Duration::from_secs(10), DEFAULT_POLL)?;
        let last = clock.now();
        assert!(!scheduler.wait_until_due(&clock, Some(last), || true));
        assert_eq!(clock.sleeps(), 0);
        Ok(())
    }

    #[test]
    fn source_kind_selects_policy() -> Result<()> {
        let scheduler = SampleScheduler::for_source(
            SourceKind::SingleCapture,
            5,
            DEFAULT_MIN_INTERVAL,
            DEFAULT_POLL,
        )?;
        assert!(matches!(scheduler.policy(), SamplePolicy::MinInterval { .. }));
        let scheduler =
            SampleScheduler::for_source(SourceKind::Video, 5, DEFAULT_MIN_INTERVAL, DEFAULT_POLL)?;
        assert_eq!(scheduler.policy(), SamplePolicy::EveryNth { stride: 5 });
        Ok(())
    }

    #[test]
    fn still_image_ignores_stride() -> Result<()> {
        let clock = ManualClock::new();
        let scheduler =
            SampleScheduler::for_source(SourceKind::Image, 5, DEFAULT_MIN_INTERVAL, DEFAULT_POLL)?;
        assert_eq!(scheduler.policy(), SamplePolicy::EveryNth { stride: 1 });
        assert!(scheduler.should_process(&ctx(1, &clock, None)));
        assert!(SampleScheduler::for_source(
            SourceKind::Image,
            0,
            DEFAULT_MIN_INTERVAL,
            DEFAULT_POLL
        )
        .is_err());
        Ok(())
    }
}
