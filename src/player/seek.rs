//! Seek 协调
//!
//! 状态机：Idle → Debounced → InProgress → Idle。
//! 协调器只决定何时执行、执行哪个目标；真正的跳转由播放管理器完成。

use crate::player::demuxer_source::SeekMode;
use log::debug;
use std::time::{Duration, Instant};

/// 与上一次请求间隔小于该值时合并
pub const SEEK_DEBOUNCE_WINDOW: Duration = Duration::from_millis(20);
/// 合并后的延迟执行时间
pub const SEEK_DEBOUNCE_DELAY: Duration = Duration::from_millis(50);
/// 不超过该距离使用直接 Seek，更远对齐关键帧（微秒）
pub const DIRECT_SEEK_MAX_DISTANCE_US: i64 = 15_000_000;
/// Seek 后寻找可显示帧的最大读包次数
pub const SEEK_FRAME_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPhase {
    Idle,
    Debounced,
    InProgress,
}

/// 一次 Seek 请求
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub target_seconds: f64,
    pub submitted_at: Instant,
}

/// 请求的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekAdmission {
    /// 在给定延迟后执行待定目标
    Scheduled(Duration),
    /// 已有 Seek 在执行
    DroppedInProgress,
    /// 解码尚未稳定，按策略拒绝
    RejectedUnstable,
}

#[derive(Debug)]
pub struct SeekCoordinator {
    phase: SeekPhase,
    pending: Option<SeekRequest>,
    last_request: Option<Instant>,
    reject_while_unstable: bool,
}

impl SeekCoordinator {
    pub fn new(reject_while_unstable: bool) -> Self {
        Self {
            phase: SeekPhase::Idle,
            pending: None,
            last_request: None,
            reject_while_unstable,
        }
    }

    pub fn phase(&self) -> SeekPhase {
        self.phase
    }

    pub fn pending(&self) -> Option<SeekRequest> {
        self.pending
    }

    /// 提交请求，返回调用方应安排的单次任务延迟
    pub fn request(&mut self, target_seconds: f64, now: Instant, decoder_stable: bool) -> SeekAdmission {
        if self.phase == SeekPhase::InProgress {
            debug!("Seek 进行中，丢弃请求: {:.3}s", target_seconds);
            return SeekAdmission::DroppedInProgress;
        }
        if self.reject_while_unstable && !decoder_stable {
            debug!("解码尚未稳定，拒绝 Seek: {:.3}s", target_seconds);
            return SeekAdmission::RejectedUnstable;
        }

        let rapid = self
            .last_request
            .map(|t| now.saturating_duration_since(t) < SEEK_DEBOUNCE_WINDOW)
            .unwrap_or(false);

        if let Some(old) = self.pending.replace(SeekRequest {
            target_seconds,
            submitted_at: now,
        }) {
            debug!("Seek 目标 {:.3}s 被 {:.3}s 取代", old.target_seconds, target_seconds);
        }
        self.last_request = Some(now);
        self.phase = SeekPhase::Debounced;

        if rapid {
            SeekAdmission::Scheduled(SEEK_DEBOUNCE_DELAY)
        } else {
            SeekAdmission::Scheduled(Duration::ZERO)
        }
    }

    /// 定时到期：取出最新目标并进入 InProgress
    pub fn begin(&mut self) -> Option<SeekRequest> {
        if self.phase != SeekPhase::Debounced {
            return None;
        }
        let request = self.pending.take()?;
        self.phase = SeekPhase::InProgress;
        Some(request)
    }

    pub fn complete(&mut self) {
        self.phase = SeekPhase::Idle;
    }

    /// 关闭 / 重新打开时丢弃所有状态
    pub fn reset(&mut self) {
        self.phase = SeekPhase::Idle;
        self.pending = None;
        self.last_request = None;
    }
}

/// 把秒数限制到 [0, duration] 并转为微秒
pub fn clamp_target(target_seconds: f64, duration_us: i64) -> i64 {
    let target_us = if target_seconds.is_finite() {
        (target_seconds * 1_000_000.0).round() as i64
    } else {
        0
    };
    target_us.clamp(0, duration_us.max(0))
}

/// 按跳转距离选择 Seek 方式
pub fn choose_mode(current_us: i64, target_us: i64) -> SeekMode {
    if (target_us - current_us).abs() <= DIRECT_SEEK_MAX_DISTANCE_US {
        SeekMode::Direct
    } else {
        SeekMode::KeyframeBackward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_target() {
        let duration = 120_000_000;
        assert_eq!(clamp_target(-5.0, duration), 0);
        assert_eq!(clamp_target(500.0, duration), 120_000_000);
        assert_eq!(clamp_target(60.5, duration), 60_500_000);
        assert_eq!(clamp_target(f64::NAN, duration), 0);
    }

    #[test]
    fn test_mode_by_distance() {
        assert_eq!(choose_mode(0, 15_000_000), SeekMode::Direct);
        assert_eq!(choose_mode(30_000_000, 20_000_000), SeekMode::Direct);
        assert_eq!(choose_mode(0, 15_000_001), SeekMode::KeyframeBackward);
        assert_eq!(choose_mode(90_000_000, 10_000_000), SeekMode::KeyframeBackward);
    }

    #[test]
    fn test_isolated_request_runs_immediately() {
        let mut seek = SeekCoordinator::new(false);
        let now = Instant::now();
        assert_eq!(seek.request(10.0, now, true), SeekAdmission::Scheduled(Duration::ZERO));
        assert_eq!(seek.phase(), SeekPhase::Debounced);

        let request = seek.begin().unwrap();
        assert_eq!(request.target_seconds, 10.0);
        assert_eq!(seek.phase(), SeekPhase::InProgress);
        seek.complete();

        let later = now + Duration::from_millis(20);
        assert_eq!(seek.request(20.0, later, true), SeekAdmission::Scheduled(Duration::ZERO));
    }

    #[test]
    fn test_rapid_requests_collapse_to_latest() {
        let mut seek = SeekCoordinator::new(false);
        let now = Instant::now();
        seek.request(10.0, now, true);
        assert_eq!(
            seek.request(30.0, now + Duration::from_millis(10), true),
            SeekAdmission::Scheduled(SEEK_DEBOUNCE_DELAY)
        );

        assert_eq!(seek.begin().unwrap().target_seconds, 30.0);
        assert_eq!(seek.begin(), None);
    }

    #[test]
    fn test_requests_while_in_progress_are_dropped() {
        let mut seek = SeekCoordinator::new(false);
        let now = Instant::now();
        seek.request(10.0, now, true);
        seek.begin();

        assert_eq!(
            seek.request(50.0, now + Duration::from_secs(1), true),
            SeekAdmission::DroppedInProgress
        );
        seek.complete();
        assert_eq!(seek.pending(), None);
        assert_eq!(seek.begin(), None);
    }

    #[test]
    fn test_unstable_policy() {
        let now = Instant::now();
        let mut lenient = SeekCoordinator::new(false);
        assert!(matches!(lenient.request(1.0, now, false), SeekAdmission::Scheduled(_)));

        let mut strict = SeekCoordinator::new(true);
        assert_eq!(strict.request(1.0, now, false), SeekAdmission::RejectedUnstable);
        assert_eq!(strict.phase(), SeekPhase::Idle);
        assert!(matches!(strict.request(1.0, now, true), SeekAdmission::Scheduled(_)));
    }
}
