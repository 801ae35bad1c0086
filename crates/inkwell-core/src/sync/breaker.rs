//! Circuit breaker guarding the remote store.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::SyncConfig;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; the next result decides between Closed and Open
    HalfOpen,
}

/// Answer to "may I call the remote store now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    /// Circuit open; try again after `retry_after`
    Defer { retry_after: Duration },
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
}

/// Opens after `threshold` consecutive failures and lets a trial call
/// through once `cooldown` has passed since it opened.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                consecutive_failures: 0,
            }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    /// Consult the breaker before a remote call.
    pub async fn check(&self) -> Admission {
        let mut breaker = self.state.lock().await;
        if breaker.state != CircuitState::Open {
            return Admission::Allow;
        }

        let elapsed = breaker
            .opened_at
            .map_or(self.cooldown, |opened_at| opened_at.elapsed());
        if elapsed > self.cooldown {
            breaker.state = CircuitState::HalfOpen;
            tracing::info!("Circuit half-open after {elapsed:?}, allowing a trial call");
            return Admission::Allow;
        }

        // Strictly past the cooldown, hence the extra millisecond.
        Admission::Defer {
            retry_after: self.cooldown - elapsed + Duration::from_millis(1),
        }
    }

    pub async fn record_success(&self) {
        let mut breaker = self.state.lock().await;
        if breaker.state != CircuitState::Closed {
            tracing::info!("Circuit closed, remote store reachable again");
        }
        breaker.state = CircuitState::Closed;
        breaker.opened_at = None;
        breaker.consecutive_failures = 0;
    }

    pub async fn record_failure(&self) {
        let mut breaker = self.state.lock().await;
        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);

        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(Instant::now());
                tracing::warn!("Trial call failed, circuit reopened");
            }
            CircuitState::Closed if breaker.consecutive_failures >= self.threshold => {
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(Instant::now());
                tracing::warn!(
                    "Circuit opened after {} consecutive failures",
                    breaker.consecutive_failures
                );
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(5))
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..3 {
            breaker.record_failure().await;
        }
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let breaker = breaker();
        breaker.record_failure().await;
        breaker.record_failure().await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.check().await, Admission::Allow);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let breaker = breaker();
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;

        assert_eq!(breaker.consecutive_failures().await, 1);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_and_defers_until_cooldown_passes() {
        let breaker = breaker();
        trip(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(4)).await;
        match breaker.check().await {
            Admission::Defer { retry_after } => {
                assert!(retry_after > Duration::from_millis(1000));
                assert!(retry_after <= Duration::from_millis(1001));
            }
            Admission::Allow => panic!("call allowed before cooldown elapsed"),
        }

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(breaker.check().await, Admission::Allow);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_cooldown_is_still_deferred() {
        let breaker = breaker();
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(breaker.check().await, Admission::Defer { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn trial_success_closes_circuit() {
        let breaker = breaker();
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.check().await, Admission::Allow);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens_with_fresh_cooldown() {
        let breaker = breaker();
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.check().await, Admission::Allow);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(matches!(breaker.check().await, Admission::Defer { .. }));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(breaker.check().await, Admission::Allow);
    }
}
