// Circuit breaker - failure-aware gate around outbound vendor calls.
//
// One breaker per vendor group. While closed, call outcomes feed rolling
// window counters; too many failures or slow calls open the breaker, after
// which callers get the fallback path until a recovery probe succeeds.
//
// State transitions are serialized under a single mutex (never held across an
// await) so concurrent failures open the breaker exactly once and counters
// are not double-counted.

use crate::core::events::{EventBus, ModerationEvent};
use crate::core::vendors::{VendorError, VendorErrorKind};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the monitoring window that open the breaker outright.
    pub failure_threshold: u32,
    /// Failure rate (0..=1) that opens the breaker once `min_calls` samples
    /// exist in the window.
    pub failure_rate_threshold: f64,
    /// Slow-call rate (0..=1) that opens the breaker once `min_calls`
    /// samples exist in the window.
    pub slow_call_rate_threshold: f64,
    /// A call slower than this counts as slow even when it succeeds.
    pub slow_call_duration: Duration,
    /// Minimum samples before the rate thresholds apply.
    pub min_calls: u32,
    /// Length of the rolling monitoring window.
    pub monitoring_window: Duration,
    /// How long the breaker stays open before the next call may probe.
    pub recovery_timeout: Duration,
    /// Maximum outstanding trial calls while half-open.
    pub half_open_max_calls: u32,
    /// Only these error kinds count toward the failure budget; anything else
    /// is reported but never trips the breaker.
    pub expected_kinds: HashSet<VendorErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            slow_call_rate_threshold: 0.8,
            slow_call_duration: Duration::from_secs(5),
            min_calls: 10,
            monitoring_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            expected_kinds: HashSet::from([
                VendorErrorKind::Timeout,
                VendorErrorKind::RateLimited,
                VendorErrorKind::Unavailable,
                VendorErrorKind::DispatcherClosed,
            ]),
        }
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Publicly observable breaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerMode {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerMode::Closed => write!(f, "closed"),
            BreakerMode::Open => write!(f, "open"),
            BreakerMode::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Which path produced a result returned from `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPath {
    Primary,
    Fallback,
}

/// Result of a gated call: the value plus which path produced it.
#[derive(Debug)]
pub struct BreakerOutcome<T> {
    pub value: T,
    pub path: CallPath,
}

#[derive(Debug, Clone, Copy)]
struct CallSample {
    at: Instant,
    failed: bool,
    slow: bool,
}

#[derive(Debug)]
enum BreakerState {
    Closed { window: VecDeque<CallSample> },
    Open { opened_at: Instant },
    HalfOpen { in_flight: u32 },
}

enum Gate {
    Allow,
    Deny,
}

enum Transition {
    None,
    Opened,
    Closed,
}

/// Per-vendor-group circuit breaker with a fallback path.
pub struct CircuitBreaker {
    vendor: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(vendor: impl Into<String>, config: BreakerConfig, events: EventBus) -> Self {
        Self {
            vendor: vendor.into(),
            config,
            state: Mutex::new(BreakerState::Closed {
                window: VecDeque::new(),
            }),
            events,
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn mode(&self) -> BreakerMode {
        match *self.lock() {
            BreakerState::Closed { .. } => BreakerMode::Closed,
            BreakerState::Open { .. } => BreakerMode::Open,
            BreakerState::HalfOpen { .. } => BreakerMode::HalfOpen,
        }
    }

    /// Run `operation` if the gate is open for traffic, otherwise (or when
    /// the operation fails with an expected error) run `fallback`.
    ///
    /// The wrapped operation's error never reaches the caller except when its
    /// kind is outside the expected allowlist - those surface unchanged and
    /// do not count toward the failure budget.
    pub async fn execute<T, Op, Fb>(
        &self,
        operation: Op,
        fallback: Fb,
    ) -> Result<BreakerOutcome<T>, VendorError>
    where
        Op: Future<Output = Result<T, VendorError>>,
        Fb: Future<Output = T>,
    {
        match self.gate() {
            Gate::Deny => {
                tracing::debug!(vendor = %self.vendor, "Circuit open, serving fallback");
                return Ok(BreakerOutcome {
                    value: fallback.await,
                    path: CallPath::Fallback,
                });
            }
            Gate::Allow => {}
        }

        let started = Instant::now();
        match operation.await {
            Ok(value) => {
                self.record_success(started.elapsed());
                Ok(BreakerOutcome {
                    value,
                    path: CallPath::Primary,
                })
            }
            Err(err) if self.config.expected_kinds.contains(&err.kind()) => {
                self.record_failure(started.elapsed());
                tracing::warn!(vendor = %self.vendor, "Vendor call failed, serving fallback: {err}");
                Ok(BreakerOutcome {
                    value: fallback.await,
                    path: CallPath::Fallback,
                })
            }
            Err(err) => {
                // Unexpected errors are reported, not tripped on.
                self.abandon_trial();
                Err(err)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Decide whether the next call may reach the vendor. Moves the breaker
    /// from open to half-open the first time a call arrives after the
    /// recovery timeout.
    fn gate(&self) -> Gate {
        let mut state = self.lock();
        match &mut *state {
            BreakerState::Closed { .. } => Gate::Allow,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    *state = BreakerState::HalfOpen { in_flight: 1 };
                    Gate::Allow
                } else {
                    Gate::Deny
                }
            }
            BreakerState::HalfOpen { in_flight } => {
                if *in_flight < self.config.half_open_max_calls {
                    *in_flight += 1;
                    Gate::Allow
                } else {
                    Gate::Deny
                }
            }
        }
    }

    fn record_success(&self, elapsed: Duration) {
        let slow = elapsed > self.config.slow_call_duration;
        let transition = {
            let mut state = self.lock();
            match &mut *state {
                BreakerState::Closed { window } => {
                    Self::push_sample(window, self.config.monitoring_window, false, slow);
                    if self.should_trip(window) {
                        *state = BreakerState::Open {
                            opened_at: Instant::now(),
                        };
                        Transition::Opened
                    } else {
                        Transition::None
                    }
                }
                BreakerState::HalfOpen { .. } => {
                    // A successful trial closes the breaker and resets all
                    // counters.
                    *state = BreakerState::Closed {
                        window: VecDeque::new(),
                    };
                    Transition::Closed
                }
                BreakerState::Open { .. } => Transition::None,
            }
        };
        self.publish(transition);
    }

    fn record_failure(&self, elapsed: Duration) {
        let slow = elapsed > self.config.slow_call_duration;
        let transition = {
            let mut state = self.lock();
            match &mut *state {
                BreakerState::Closed { window } => {
                    Self::push_sample(window, self.config.monitoring_window, true, slow);
                    if self.should_trip(window) {
                        *state = BreakerState::Open {
                            opened_at: Instant::now(),
                        };
                        Transition::Opened
                    } else {
                        Transition::None
                    }
                }
                BreakerState::HalfOpen { .. } => {
                    // A failed trial reopens and restarts the recovery timer.
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    Transition::Opened
                }
                BreakerState::Open { .. } => Transition::None,
            }
        };
        self.publish(transition);
    }

    /// An unexpected error leaves the counters untouched; if it happened on a
    /// half-open trial the trial slot is released so recovery can still be
    /// probed.
    fn abandon_trial(&self) {
        let mut state = self.lock();
        if let BreakerState::HalfOpen { in_flight } = &mut *state {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    fn push_sample(
        window: &mut VecDeque<CallSample>,
        window_length: Duration,
        failed: bool,
        slow: bool,
    ) {
        let now = Instant::now();
        window.push_back(CallSample {
            at: now,
            failed,
            slow,
        });
        let cutoff = now.checked_sub(window_length);
        while window
            .front()
            .is_some_and(|s| cutoff.is_some_and(|c| s.at < c))
        {
            window.pop_front();
        }
    }

    fn should_trip(&self, window: &VecDeque<CallSample>) -> bool {
        let total = window.len() as u32;
        let failures = window.iter().filter(|s| s.failed).count() as u32;
        if failures >= self.config.failure_threshold {
            return true;
        }

        if total >= self.config.min_calls.max(1) {
            let slow = window.iter().filter(|s| s.slow).count() as u32;
            let failure_rate = f64::from(failures) / f64::from(total);
            let slow_rate = f64::from(slow) / f64::from(total);
            if failure_rate >= self.config.failure_rate_threshold
                || slow_rate >= self.config.slow_call_rate_threshold
            {
                return true;
            }
        }
        false
    }

    fn publish(&self, transition: Transition) {
        match transition {
            Transition::Opened => {
                tracing::warn!(vendor = %self.vendor, "Circuit breaker opened");
                self.events.publish(ModerationEvent::CircuitOpened {
                    vendor: self.vendor.clone(),
                });
            }
            Transition::Closed => {
                tracing::info!(vendor = %self.vendor, "Circuit breaker closed");
                self.events.publish(ModerationEvent::CircuitClosed {
                    vendor: self.vendor.clone(),
                });
            }
            Transition::None => {}
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(failure_threshold: u32, recovery: Duration) -> BreakerConfig {
        BreakerConfig {
            failure_threshold,
            recovery_timeout: recovery,
            ..BreakerConfig::default()
        }
    }

    fn breaker(failure_threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new("openai", config(failure_threshold, recovery), EventBus::new(8))
    }

    async fn fail_once(b: &CircuitBreaker) {
        let outcome = b
            .execute(async { Err::<u32, _>(VendorError::Timeout) }, async { 0 })
            .await
            .unwrap();
        assert_eq!(outcome.path, CallPath::Fallback);
    }

    #[tokio::test]
    async fn successful_calls_pass_through_closed_breaker() {
        let b = breaker(5, Duration::from_secs(30));
        let outcome = b
            .execute(async { Ok::<_, VendorError>(42) }, async { 0 })
            .await
            .unwrap();

        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.path, CallPath::Primary);
        assert_eq!(b.mode(), BreakerMode::Closed);
    }

    #[tokio::test]
    async fn five_timeouts_open_the_breaker() {
        let b = breaker(5, Duration::from_secs(30));
        for _ in 0..5 {
            fail_once(&b).await;
        }
        assert_eq!(b.mode(), BreakerMode::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_serves_only_the_fallback() {
        let b = breaker(5, Duration::from_secs(30));
        for _ in 0..5 {
            fail_once(&b).await;
        }

        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let outcome = b
                .execute(
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, VendorError>(1)
                    },
                    async { 99 },
                )
                .await
                .unwrap();
            assert_eq!(outcome.path, CallPath::Fallback);
            assert_eq!(outcome.value, 99);
        }
        // The wrapped operation was never reached.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_probe_after_recovery_closes_the_breaker() {
        let b = breaker(5, Duration::from_secs(30));
        for _ in 0..5 {
            fail_once(&b).await;
        }
        assert_eq!(b.mode(), BreakerMode::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        let outcome = b
            .execute(async { Ok::<_, VendorError>(7) }, async { 0 })
            .await
            .unwrap();
        assert_eq!(outcome.path, CallPath::Primary);
        assert_eq!(b.mode(), BreakerMode::Closed);

        // Counters were reset: old failures no longer count.
        fail_once(&b).await;
        assert_eq!(b.mode(), BreakerMode::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_and_restarts_the_timer() {
        let b = breaker(5, Duration::from_secs(30));
        for _ in 0..5 {
            fail_once(&b).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        fail_once(&b).await;
        assert_eq!(b.mode(), BreakerMode::Open);

        // Recovery restarted - still open before the new timeout elapses.
        tokio::time::advance(Duration::from_secs(15)).await;
        let outcome = b
            .execute(async { Ok::<_, VendorError>(1) }, async { 0 })
            .await
            .unwrap();
        assert_eq!(outcome.path, CallPath::Fallback);
    }

    #[tokio::test]
    async fn unexpected_errors_surface_and_do_not_trip() {
        let b = breaker(2, Duration::from_secs(30));
        for _ in 0..5 {
            let result = b
                .execute(
                    async { Err::<u32, _>(VendorError::InvalidResponse("bad json".to_string())) },
                    async { 0 },
                )
                .await;
            assert!(matches!(result, Err(VendorError::InvalidResponse(_))));
        }
        assert_eq!(b.mode(), BreakerMode::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_alone_can_open_the_breaker() {
        let cfg = BreakerConfig {
            failure_threshold: 100,
            slow_call_duration: Duration::from_millis(100),
            slow_call_rate_threshold: 0.5,
            min_calls: 4,
            ..BreakerConfig::default()
        };
        let b = CircuitBreaker::new("perspective", cfg, EventBus::new(8));

        for _ in 0..4 {
            let outcome = b
                .execute(
                    async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, VendorError>(1)
                    },
                    async { 0 },
                )
                .await
                .unwrap();
            // Slow calls still succeed from the caller's point of view.
            assert_eq!(outcome.path, CallPath::Primary);
        }
        assert_eq!(b.mode(), BreakerMode::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_limits_concurrent_trials() {
        let b = breaker(5, Duration::from_secs(30));
        for _ in 0..5 {
            fail_once(&b).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        // First gate check moves to half-open and claims the only trial slot.
        assert!(matches!(b.gate(), Gate::Allow));
        assert_eq!(b.mode(), BreakerMode::HalfOpen);
        // A second concurrent call is denied while the trial is outstanding.
        assert!(matches!(b.gate(), Gate::Deny));
    }

    #[tokio::test]
    async fn breaker_open_event_is_published_once() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let b = CircuitBreaker::new("openai", config(3, Duration::from_secs(30)), bus);

        for _ in 0..5 {
            fail_once(&b).await;
        }

        match rx.recv().await.unwrap() {
            ModerationEvent::CircuitOpened { vendor } => assert_eq!(vendor, "openai"),
            other => panic!("unexpected event: {other:?}"),
        }
        // Failures after opening do not re-publish.
        assert!(rx.try_recv().is_err());
    }
}
