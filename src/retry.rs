//! 重连退避策略与可取消的重试定时器。
//! Reconnect backoff and the cancellable retry timer.

use crate::config::RetryPolicy;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks consecutive failures and the interval the next reconnect waits.
///
/// The interval starts at `base_interval`. Once `failure_threshold`
/// consecutive failures were recorded it switches to `slow_interval` and
/// stays there until [`Backoff::on_success`] is called.
///
/// 跟踪连续失败次数以及下一次重连的等待间隔。
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    consecutive_failures: u32,
    current_interval: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let current_interval = policy.base_interval;
        Self {
            policy,
            consecutive_failures: 0,
            current_interval,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Records a failed attempt or a broken connection.
    ///
    /// Returns true if this failure switched the interval to the slow one.
    pub fn on_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.policy.failure_threshold
            && self.current_interval == self.policy.base_interval
            && self.policy.slow_interval != self.policy.base_interval
        {
            self.current_interval = self.policy.slow_interval;
            return true;
        }
        false
    }

    /// Records a successful connect.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.current_interval = self.policy.base_interval;
    }
}

/// The single pending reconnect, if any.
///
/// Only the deadline is stored; the owning event loop sleeps until it.
/// Cancelling clears it, so a cancelled retry can never fire.
///
/// 唯一的待处理重连。仅存储截止时间，由所属事件循环等待；取消后不会再触发。
#[derive(Debug, Default)]
pub struct RetryTimer {
    deadline: Option<Instant>,
}

impl RetryTimer {
    /// Schedules the retry `delay` from now, replacing any pending one.
    pub fn schedule(&mut self, delay: Duration) -> Instant {
        let deadline = Instant::now() + delay;
        self.deadline = Some(deadline);
        deadline
    }

    /// Cancels the pending retry. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(5000);
    const SLOW: Duration = Duration::from_millis(10000);

    #[test]
    fn test_intervals_escalate_on_third_failure() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        assert_eq!(backoff.current_interval(), BASE);

        let mut scheduled = Vec::new();
        for _ in 0..3 {
            backoff.on_failure();
            scheduled.push(backoff.current_interval());
        }
        assert_eq!(scheduled, vec![BASE, BASE, SLOW]);
        assert_eq!(backoff.consecutive_failures(), 3);
    }

    #[test]
    fn test_escalation_reported_once() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        let escalations: Vec<bool> = (0..6).map(|_| backoff.on_failure()).collect();
        assert_eq!(escalations, vec![false, false, true, false, false, false]);
        assert_eq!(backoff.current_interval(), SLOW);
        assert_eq!(backoff.consecutive_failures(), 6);
    }

    #[test]
    fn test_failure_count_tracks_every_failure() {
        for n in 0..10u32 {
            let mut backoff = Backoff::new(RetryPolicy::default());
            for _ in 0..n {
                backoff.on_failure();
            }
            assert_eq!(backoff.consecutive_failures(), n);
            let expected = if n >= 3 { SLOW } else { BASE };
            assert_eq!(backoff.current_interval(), expected);
        }
    }

    #[test]
    fn test_success_resets() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        for _ in 0..5 {
            backoff.on_failure();
        }
        backoff.on_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.current_interval(), BASE);

        backoff.on_failure();
        assert_eq!(backoff.current_interval(), BASE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timer_cancel() {
        let mut timer = RetryTimer::default();
        assert!(!timer.is_pending());
        assert!(!timer.cancel());

        let deadline = timer.schedule(BASE);
        assert_eq!(timer.deadline(), Some(deadline));
        assert_eq!(deadline - Instant::now(), BASE);

        assert!(timer.cancel());
        assert!(timer.deadline().is_none());
    }
}
