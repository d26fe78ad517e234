use std::sync::Arc;
use std::time::Instant;

/// 默认安全余量：剩余时间不足时停止新工作，保证能完成汇总并返回
pub const DEFAULT_MIN_REMAINING_MS: u64 = 150;

/// 可注入的时钟（毫秒），便于测试
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// 单调时钟，以创建时刻为零点
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// 单次运行的时间预算
///
/// 自身从不报错；是否中止由调用方决定。
#[derive(Clone)]
pub struct TimeBudget {
    clock: Arc<dyn Clock>,
    started_ms: u64,
    budget_ms: u64,
}

impl TimeBudget {
    pub fn start(budget_ms: u64, clock: Arc<dyn Clock>) -> Self {
        let started_ms = clock.now_ms();
        Self {
            clock,
            started_ms,
            budget_ms,
        }
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.started_ms)
    }

    pub fn remaining_ms(&self) -> u64 {
        self.budget_ms.saturating_sub(self.elapsed_ms())
    }

    pub fn over_budget(&self) -> bool {
        self.elapsed_ms() >= self.budget_ms
    }

    /// 剩余时间降到安全余量及以下时返回 true
    pub fn should_exit(&self, min_remaining_ms: u64) -> bool {
        self.remaining_ms() <= min_remaining_ms
    }

    pub fn should_exit_default(&self) -> bool {
        self.should_exit(DEFAULT_MIN_REMAINING_MS)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// 手动推进的时钟
    pub(crate) struct ManualClock {
        now: AtomicU64,
    }

    impl ManualClock {
        pub(crate) fn new(start: u64) -> Self {
            Self {
                now: AtomicU64::new(start),
            }
        }

        pub(crate) fn set(&self, ms: u64) {
            self.now.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_budget_accounting() {
        let clock = Arc::new(ManualClock::new(1_000));
        let budget = TimeBudget::start(2_000, clock.clone());

        assert_eq!(budget.elapsed_ms(), 0);
        assert_eq!(budget.remaining_ms(), 2_000);
        assert!(!budget.over_budget());
        assert!(!budget.should_exit_default());

        clock.set(2_500);
        assert_eq!(budget.elapsed_ms(), 1_500);
        assert_eq!(budget.remaining_ms(), 500);
        assert!(!budget.should_exit(400));
        assert!(budget.should_exit(500));

        clock.set(3_001);
        assert!(budget.over_budget());
        assert_eq!(budget.remaining_ms(), 0);
        assert!(budget.should_exit(0));
    }

    #[test]
    fn test_clock_going_backwards_is_harmless() {
        let clock = Arc::new(ManualClock::new(500));
        let budget = TimeBudget::start(100, clock.clone());
        clock.set(10);
        assert_eq!(budget.elapsed_ms(), 0);
        assert!(!budget.over_budget());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
