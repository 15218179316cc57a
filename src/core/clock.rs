use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 时间源 - 引擎内所有计时都经由它，测试中可替换为手动时钟
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// 系统单调时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的时钟（测试用，也可用于离线回放）
#[derive(Debug)]
pub struct ManualTime {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// 播放时钟 - 视频位置与音频主时钟（均为微秒）
///
/// 两个值放在同一把锁下，Seek 时一次性复位到目标位置。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    current_position: i64, // 视频推导的当前位置
    master_clock: i64,     // 音频参考时钟，可被同步校正器调整
    just_reset: bool,      // 刚 Seek 过，允许位置回退一次
}

/// 时钟快照（值类型，拷贝读出）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub current_position: i64,
    pub master_clock: i64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                current_position: 0,
                master_clock: 0,
                just_reset: true,
            })),
        }
    }

    /// 当前视频位置（微秒）
    pub fn position(&self) -> i64 {
        self.inner.lock().current_position
    }

    /// 音频主时钟（微秒）
    pub fn master(&self) -> i64 {
        self.inner.lock().master_clock
    }

    pub fn set_master(&self, us: i64) {
        self.inner.lock().master_clock = us;
    }

    /// 推进视频位置
    ///
    /// 位置只向前走；Seek 后的第一次更新除外。返回是否生效。
    pub fn advance_position(&self, us: i64) -> bool {
        let mut inner = self.inner.lock();
        if us >= inner.current_position || inner.just_reset {
            inner.current_position = us;
            inner.just_reset = false;
            true
        } else {
            false
        }
    }

    /// 同时复位位置与主时钟（Seek / 停止）
    pub fn reset(&self, target_us: i64) {
        let mut inner = self.inner.lock();
        inner.current_position = target_us;
        inner.master_clock = target_us;
        inner.just_reset = true;
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        let inner = self.inner.lock();
        ClockSnapshot {
            current_position: inner.current_position,
            master_clock: inner.master_clock,
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_forward_only_except_after_reset() {
        let clock = PlaybackClock::new();
        assert!(clock.advance_position(40_000));
        assert!(clock.advance_position(80_000));
        assert!(!clock.advance_position(60_000));
        assert_eq!(clock.position(), 80_000);

        clock.reset(10_000);
        assert!(clock.advance_position(5_000));
        assert_eq!(clock.position(), 5_000);
        assert!(!clock.advance_position(4_000));
    }

    #[test]
    fn test_reset_moves_both_clocks() {
        let clock = PlaybackClock::new();
        clock.advance_position(1_000_000);
        clock.set_master(900_000);
        clock.reset(60_000_000);
        assert_eq!(
            clock.snapshot(),
            ClockSnapshot {
                current_position: 60_000_000,
                master_clock: 60_000_000
            }
        );
    }

    #[test]
    fn test_manual_time_advances() {
        let time = ManualTime::new();
        let t0 = time.now();
        time.advance_ms(25);
        assert_eq!(time.now() - t0, Duration::from_millis(25));
    }
}
