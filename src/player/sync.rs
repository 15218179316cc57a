//! 音画同步校正
//!
//! 视频位置是权威时间，音频主时钟按漂移量的分级比例向视频靠拢。

use crate::core::SourceKind;
use log::{debug, info};
use std::time::{Duration, Instant};

/// 两次校正之间的最小间隔
pub const CORRECTION_INTERVAL: Duration = Duration::from_millis(100);
const STATUS_LOG_EVERY: u64 = 100;

/// 同步参数（微秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncParams {
    pub threshold_us: i64,
    pub max_correctable_us: i64,
    pub min_adjustment_us: i64,
}

impl SyncParams {
    pub const LOCAL: SyncParams = SyncParams {
        threshold_us: 40_000,
        max_correctable_us: 200_000,
        min_adjustment_us: 10_000,
    };

    /// 网络流抖动更大，阈值放宽
    pub const NETWORK: SyncParams = SyncParams {
        threshold_us: 60_000,
        max_correctable_us: 300_000,
        min_adjustment_us: 15_000,
    };

    pub fn for_kind(kind: SourceKind) -> Self {
        match kind {
            SourceKind::LocalFile => Self::LOCAL,
            SourceKind::NetworkStream => Self::NETWORK,
        }
    }
}

/// 单次评估结果，`delta` 为视频位置减音频时钟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    InSync { delta: i64 },
    Corrected { delta: i64, adjustment: i64, new_master: i64 },
    /// 距上次校正不足 100ms
    RateLimited { delta: i64 },
    /// 漂移过大（多半是 Seek 进行中），只记录不校正
    OutOfRange { delta: i64 },
}

/// 同步统计（随会话重置）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub evaluations: u64,
    pub corrections: u64,
    pub out_of_range: u64,
}

/// 漂移对应的校正比例
fn correction_ratio(abs_delta: i64) -> f64 {
    match abs_delta {
        d if d > 150_000 => 0.8,
        d if d > 100_000 => 0.6,
        d if d > 60_000 => 0.4,
        _ => 0.3,
    }
}

#[derive(Debug)]
pub struct SyncCorrector {
    params: SyncParams,
    last_correction: Option<Instant>,
    stats: SyncStats,
}

impl SyncCorrector {
    pub fn new(kind: SourceKind) -> Self {
        Self::with_params(SyncParams::for_kind(kind))
    }

    pub fn with_params(params: SyncParams) -> Self {
        Self {
            params,
            last_correction: None,
            stats: SyncStats::default(),
        }
    }

    pub fn params(&self) -> SyncParams {
        self.params
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// 比较视频位置与音频时钟，决定是否校正
    pub fn evaluate(&mut self, video_us: i64, audio_us: i64, now: Instant) -> SyncDecision {
        self.stats.evaluations += 1;
        let delta = video_us - audio_us;
        let abs_delta = delta.abs();

        let decision = if abs_delta <= self.params.threshold_us {
            SyncDecision::InSync { delta }
        } else if abs_delta >= self.params.max_correctable_us {
            self.stats.out_of_range += 1;
            debug!("音画偏差过大，不校正: {}ms", delta / 1000);
            SyncDecision::OutOfRange { delta }
        } else if self
            .last_correction
            .map(|t| now.saturating_duration_since(t) < CORRECTION_INTERVAL)
            .unwrap_or(false)
        {
            SyncDecision::RateLimited { delta }
        } else {
            let mut adjustment = (delta as f64 * correction_ratio(abs_delta)).round() as i64;
            if adjustment.abs() < self.params.min_adjustment_us {
                adjustment = self.params.min_adjustment_us * delta.signum();
            }
            self.last_correction = Some(now);
            self.stats.corrections += 1;
            debug!(
                "🔄 音画同步校正: 偏差 {}ms, 调整 {}ms",
                delta / 1000,
                adjustment / 1000
            );
            SyncDecision::Corrected {
                delta,
                adjustment,
                new_master: video_us - adjustment,
            }
        };

        if self.stats.evaluations % STATUS_LOG_EVERY == 0 {
            info!(
                "同步状态: 视频 {}ms, 音频 {}ms, 偏差 {}ms, 已校正 {} 次",
                video_us / 1000,
                audio_us / 1000,
                delta / 1000,
                self.stats.corrections
            );
        }

        decision
    }
}
