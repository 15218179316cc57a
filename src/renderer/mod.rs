//! 渲染回调
//!
//! 引擎只把解码后的原始帧交给渲染端，颜色转换和绘制都由渲染端完成。

use crate::core::{PixelFormat, VideoFrame};
use log::{debug, info};

/// 渲染端接口
pub trait FrameRenderer {
    /// 一帧视频已解码，`display_ts_us` 为显示时间戳（微秒）
    fn on_frame_decoded(&mut self, frame: &VideoFrame, width: u32, height: u32, display_ts_us: i64);
}

/// 渲染统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    pub size_changes: u64,
    pub last_display_us: i64,
}

/// 只做统计的渲染端（命令行播放使用）
#[derive(Debug, Default)]
pub struct StatsRenderer {
    stats: RenderStats,
    size: Option<(u32, u32, PixelFormat)>,
}

impl StatsRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }
}

impl FrameRenderer for StatsRenderer {
    fn on_frame_decoded(&mut self, frame: &VideoFrame, width: u32, height: u32, display_ts_us: i64) {
        let size = (width, height, frame.format);
        if self.size != Some(size) {
            info!("🎨 视频尺寸: {}x{} {:?}", width, height, frame.format);
            self.size = Some(size);
            self.stats.size_changes += 1;
        }

        self.stats.frames_rendered += 1;
        self.stats.last_display_us = display_ts_us;
        if self.stats.frames_rendered % 250 == 0 {
            debug!(
                "已渲染 {} 帧，当前 {:.2}s",
                self.stats.frames_rendered,
                display_ts_us as f64 / 1_000_000.0
            );
        }
    }
}
