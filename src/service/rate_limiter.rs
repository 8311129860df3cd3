//! Per-provider request admission
//!
//! Each provider gets a budget of requests per fixed 60 second window. The
//! window resets on the first check after it has elapsed, so a burst straddling
//! a boundary can see up to twice the budget.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::clock::{SharedClock, system_clock};
use crate::model::ProviderKind;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct WindowState {
    budget: u32,
    consumed: u32,
    window_start: Instant,
}

impl WindowState {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= WINDOW
    }
}

pub struct RateLimiter {
    enabled: bool,
    default_budget: u32,
    windows: Mutex<HashMap<ProviderKind, WindowState>>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_minute: u32) -> Self {
        Self::with_clock(enabled, requests_per_minute, system_clock())
    }

    pub fn with_clock(enabled: bool, requests_per_minute: u32, clock: SharedClock) -> Self {
        Self {
            enabled,
            default_budget: requests_per_minute,
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Override the per-minute budget for one provider
    pub fn set_budget(&self, provider: ProviderKind, requests_per_minute: u32) {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows
            .entry(provider)
            .and_modify(|w| w.budget = requests_per_minute)
            .or_insert(WindowState {
                budget: requests_per_minute,
                consumed: 0,
                window_start: now,
            });
    }

    /// Admit one request, consuming budget when admitted
    pub fn check(&self, provider: ProviderKind) -> bool {
        if !self.enabled {
            return true;
        }

        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let state = windows.entry(provider).or_insert(WindowState {
            budget: self.default_budget,
            consumed: 0,
            window_start: now,
        });

        if state.expired(now) {
            state.consumed = 0;
            state.window_start = now;
        }

        if state.consumed < state.budget {
            state.consumed += 1;
            true
        } else {
            tracing::debug!(
                provider = %provider,
                budget = state.budget,
                "Rate limit exceeded"
            );
            false
        }
    }

    /// Requests still admissible in the current window, without consuming any
    pub fn remaining(&self, provider: ProviderKind) -> u32 {
        if !self.enabled {
            return u32::MAX;
        }

        let now = self.clock.now();
        let windows = self.windows.lock();
        match windows.get(&provider) {
            Some(state) if state.expired(now) => state.budget,
            Some(state) => state.budget.saturating_sub(state.consumed),
            None => self.default_budget,
        }
    }

    pub fn reset(&self, provider: ProviderKind) {
        let now = self.clock.now();
        if let Some(state) = self.windows.lock().get_mut(&provider) {
            state.consumed = 0;
            state.window_start = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::service::clock::ManualClock;

    fn limiter(budget: u32) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        (
            RateLimiter::with_clock(true, budget, Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_budget_then_deny_then_rollover() {
        let (limiter, clock) = limiter(5);

        for _ in 0..5 {
            assert!(limiter.check(ProviderKind::OpenAi));
        }
        assert!(!limiter.check(ProviderKind::OpenAi));

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check(ProviderKind::OpenAi));
    }

    #[test]
    fn test_providers_are_independent() {
        let (limiter, _) = limiter(1);
        assert!(limiter.check(ProviderKind::OpenAi));
        assert!(!limiter.check(ProviderKind::OpenAi));
        assert!(limiter.check(ProviderKind::Claude));
    }

    #[test]
    fn test_remaining_is_pure() {
        let (limiter, clock) = limiter(3);
        assert_eq!(limiter.remaining(ProviderKind::Local), 3);
        limiter.check(ProviderKind::Local);
        assert_eq!(limiter.remaining(ProviderKind::Local), 2);
        assert_eq!(limiter.remaining(ProviderKind::Local), 2);

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.remaining(ProviderKind::Local), 3);
    }

    #[test]
    fn test_reset_and_budget_override() {
        let (limiter, _) = limiter(2);
        limiter.set_budget(ProviderKind::Claude, 1);
        assert!(limiter.check(ProviderKind::Claude));
        assert!(!limiter.check(ProviderKind::Claude));

        limiter.reset(ProviderKind::Claude);
        assert!(limiter.check(ProviderKind::Claude));
    }

    #[test]
    fn test_disabled_admits_everything() {
        let limiter = RateLimiter::new(false, 1);
        for _ in 0..100 {
            assert!(limiter.check(ProviderKind::OpenAi));
        }
    }
}
