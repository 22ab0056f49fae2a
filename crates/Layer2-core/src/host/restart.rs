//! 재시작 정책 - 롤링 윈도우 안의 재시작 횟수 제한
//!
//! 카운터와 마지막 재시작 시각은 항상 함께 읽고 갱신한다.

use eterm_foundation::RestartPolicyConfig;
use std::time::{Duration, Instant};

/// 크래시 이후 결정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// `delay` 후 재시작 (attempt는 1부터)
    Retry { attempt: u32, delay: Duration },

    /// 윈도우 안에서 한도 초과: 종료 상태로
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: RestartPolicyConfig,
    count: u32,
    last_restart: Option<Instant>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicyConfig) -> Self {
        Self {
            policy,
            count: 0,
            last_restart: None,
        }
    }

    /// 크래시 기록 후 다음 행동 결정
    ///
    /// 마지막 재시작이 윈도우보다 오래됐으면 카운터를 0으로 되돌린다.
    /// 지연은 `attempt * base_delay`로 선형 증가.
    pub fn record_crash(&mut self, now: Instant) -> RestartDecision {
        if let Some(last) = self.last_restart {
            if now.saturating_duration_since(last) > self.policy.window() {
                self.count = 0;
            }
        }

        if self.count >= self.policy.max_restarts {
            return RestartDecision::GiveUp {
                attempts: self.count,
            };
        }

        self.count += 1;
        self.last_restart = Some(now);
        RestartDecision::Retry {
            attempt: self.count,
            delay: self.policy.base_delay() * self.count,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_restart = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> RestartTracker {
        RestartTracker::new(RestartPolicyConfig::default())
    }

    #[test]
    fn test_linear_backoff() {
        let mut t = tracker();
        let now = Instant::now();

        assert_eq!(
            t.record_crash(now),
            RestartDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(
            t.record_crash(now + Duration::from_secs(1)),
            RestartDecision::Retry {
                attempt: 2,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn test_sixth_crash_in_window_gives_up() {
        let mut t = tracker();
        let start = Instant::now();

        for i in 0..5 {
            let decision = t.record_crash(start + Duration::from_secs(i));
            assert!(matches!(decision, RestartDecision::Retry { .. }));
        }
        assert_eq!(
            t.record_crash(start + Duration::from_secs(10)),
            RestartDecision::GiveUp { attempts: 5 }
        );
    }

    #[test]
    fn test_window_elapsed_resets_counter() {
        let mut t = tracker();
        let start = Instant::now();

        for i in 0..5 {
            t.record_crash(start + Duration::from_secs(i));
        }
        // 마지막 재시작(4초)으로부터 60초 초과
        let decision = t.record_crash(start + Duration::from_secs(65));
        assert_eq!(
            decision,
            RestartDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(t.attempts(), 1);
    }

    #[test]
    fn test_reset() {
        let mut t = tracker();
        t.record_crash(Instant::now());
        t.reset();
        assert_eq!(t.attempts(), 0);
    }
}
