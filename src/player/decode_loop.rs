//! 解码循环
//!
//! 每次调度读取数据包，直到解出一帧视频或到达流末尾。音频包在同一次调度内
//! 交给音频引擎；音频时钟更新时顺带做一次音画同步校正。

use crate::core::{PlaybackClock, PlayerError, VideoFrame};
use crate::player::audio_engine::AudioEngine;
use crate::player::demuxer_source::PacketType;
use crate::player::media_source::MediaSource;
use crate::player::sync::{SyncCorrector, SyncDecision};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Instant;

/// 开始 / 恢复 / Seek 后视为不稳定的帧数
pub const STABILIZATION_FRAMES: u32 = 5;
/// 连续读包失败达到该次数后按流结束处理
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// 单次调度结果
#[derive(Debug)]
pub enum TickOutcome {
    FrameProduced { frame: VideoFrame, display_us: i64 },
    EndOfStream,
    /// 可恢复的读取错误，下次调度继续
    DecodeError(PlayerError),
}

/// 一次调度用到的协作者
pub struct TickContext<'a> {
    pub source: &'a mut MediaSource,
    pub audio: Option<&'a mut AudioEngine>,
    pub sync: &'a mut SyncCorrector,
    pub clock: &'a PlaybackClock,
    pub now: Instant,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames_produced: u64,
    pub skipped_packets: u64,
    pub audio_packets: u64,
}

#[derive(Debug, Default)]
pub struct DecodeLoop {
    /// 一个包解出多帧时暂存
    pending: VecDeque<VideoFrame>,
    drained: bool,
    frames_since_restart: u32,
    last_display_us: Option<i64>,
    read_errors: u32,
    stats: DecodeStats,
}

impl DecodeLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// 稳定窗口已过
    pub fn is_stable(&self) -> bool {
        self.frames_since_restart >= STABILIZATION_FRAMES
    }

    /// 开始 / 恢复播放时重新进入稳定窗口
    pub fn restart_stabilization(&mut self) {
        self.frames_since_restart = 0;
    }

    /// Seek 后丢弃暂存帧和流结束标记
    pub fn reset(&mut self) {
        self.pending.clear();
        self.drained = false;
        self.last_display_us = None;
        self.read_errors = 0;
        self.restart_stabilization();
    }

    pub fn tick(&mut self, ctx: TickContext<'_>) -> TickOutcome {
        let TickContext {
            source,
            mut audio,
            sync,
            clock,
            now,
        } = ctx;
        let frame_us = (1_000_000.0 / source.info.fps.max(1.0)) as i64;

        loop {
            if let Some(frame) = self.pending.pop_front() {
                return self.produce(frame, frame_us);
            }
            if self.drained {
                return TickOutcome::EndOfStream;
            }

            let packet = match source.demuxer.read_packet() {
                Ok(Some(packet)) => {
                    self.read_errors = 0;
                    packet
                }
                Ok(None) => {
                    // 取出解码器里剩余的帧，之后只会返回 EndOfStream
                    self.drained = true;
                    match source.video_decoder.drain() {
                        Ok(frames) => {
                            if !frames.is_empty() {
                                debug!("流结束，排空解码器剩余 {} 帧", frames.len());
                            }
                            self.pending.extend(frames);
                        }
                        Err(e) => warn!("排空视频解码器失败: {}", e),
                    }
                    if self.pending.is_empty() {
                        info!("🏁 播放到达流末尾");
                    }
                    continue;
                }
                Err(e) => {
                    self.read_errors += 1;
                    if self.read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        warn!("连续 {} 次读取失败，按流结束处理: {}", self.read_errors, e);
                        self.drained = true;
                        continue;
                    }
                    return TickOutcome::DecodeError(e);
                }
            };

            match packet.packet_type {
                PacketType::Audio => {
                    self.stats.audio_packets += 1;
                    let Some(engine) = audio.as_deref_mut() else {
                        continue;
                    };
                    if engine.submit_packet(&packet.packet) {
                        let decision = sync.evaluate(clock.position(), engine.get_audio_clock(), now);
                        if let SyncDecision::Corrected { new_master, .. } = decision {
                            engine.set_master_clock(new_master);
                        }
                    }
                }
                PacketType::Video => match source.video_decoder.decode(&packet.packet) {
                    Ok(frames) => self.pending.extend(frames),
                    Err(e) => {
                        self.stats.skipped_packets += 1;
                        debug!("视频包解码失败（已跳过）: {}", e);
                    }
                },
            }
        }
    }

    fn produce(&mut self, frame: VideoFrame, frame_us: i64) -> TickOutcome {
        let display_us = frame
            .pts_us
            .or_else(|| self.last_display_us.map(|last| last + frame_us))
            .unwrap_or(0);
        self.last_display_us = Some(display_us);
        self.frames_since_restart = self.frames_since_restart.saturating_add(1);
        self.stats.frames_produced += 1;
        if self.frames_since_restart == STABILIZATION_FRAMES {
            debug!("解码已稳定");
        }
        TickOutcome::FrameProduced { frame, display_us }
    }

    /// Seek 后寻找第一帧可显示的视频帧，最多读 `max_reads` 个包；音频包丢弃
    ///
    /// 帧没有 PTS 时按 Seek 目标 `target_us` 显示。
    pub fn find_frame_after_seek(
        &mut self,
        source: &mut MediaSource,
        target_us: i64,
        max_reads: usize,
    ) -> Option<(VideoFrame, i64)> {
        for attempt in 0..max_reads {
            let packet = match source.demuxer.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    debug!("Seek 后读包失败（第 {} 次）: {}", attempt + 1, e);
                    break;
                }
            };
            if !packet.is_video() {
                continue;
            }
            match source.video_decoder.decode(&packet.packet) {
                Ok(frames) => {
                    let mut frames = frames.into_iter();
                    if let Some(frame) = frames.next() {
                        self.pending.extend(frames);
                        let display_us = frame.pts_us.unwrap_or(target_us);
                        self.last_display_us = Some(display_us);
                        debug!("Seek 后第 {} 次读包得到可显示帧", attempt + 1);
                        return Some((frame, display_us));
                    }
                }
                Err(e) => debug!("Seek 后视频包解码失败（已跳过）: {}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceKind;
    use crate::player::testing::MockSource;

    fn run_tick(looper: &mut DecodeLoop, source: &mut MediaSource, sync: &mut SyncCorrector) -> TickOutcome {
        let clock = PlaybackClock::new();
        looper.tick(TickContext {
            source,
            audio: None,
            sync,
            clock: &clock,
            now: Instant::now(),
        })
    }

    fn video_only(media: MockSource) -> (MediaSource, SyncCorrector) {
        (
            media.into_source(SourceKind::LocalFile, "mock.mp4"),
            SyncCorrector::new(SourceKind::LocalFile),
        )
    }

    #[test]
    fn test_each_tick_produces_one_frame_in_order() {
        let (mut source, mut sync) = video_only(MockSource::new(1.0, 25.0, true));
        let mut looper = DecodeLoop::new();

        for i in 0..3 {
            match run_tick(&mut looper, &mut source, &mut sync) {
                TickOutcome::FrameProduced { display_us, .. } => assert_eq!(display_us, i * 40_000),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(looper.stats().audio_packets, 3);
    }

    #[test]
    fn test_corrupt_packets_are_skipped() {
        let mut media = MockSource::new(1.0, 25.0, false);
        media.corrupt_frames = vec![1, 2];
        let (mut source, mut sync) = video_only(media);
        let mut looper = DecodeLoop::new();

        run_tick(&mut looper, &mut source, &mut sync);
        match run_tick(&mut looper, &mut source, &mut sync) {
            TickOutcome::FrameProduced { display_us, .. } => assert_eq!(display_us, 120_000),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(looper.stats().skipped_packets, 2);
    }

    #[test]
    fn test_end_of_stream_drains_decoder_first() {
        let mut media = MockSource::new(0.2, 25.0, false);
        media.decoder_delay = 2;
        let (mut source, mut sync) = video_only(media);
        let mut looper = DecodeLoop::new();

        let mut shown = Vec::new();
        loop {
            match run_tick(&mut looper, &mut source, &mut sync) {
                TickOutcome::FrameProduced { display_us, .. } => shown.push(display_us),
                TickOutcome::EndOfStream => break,
                TickOutcome::DecodeError(e) => panic!("{}", e),
            }
        }
        assert_eq!(shown, vec![0, 40_000, 80_000, 120_000, 160_000]);
        assert!(matches!(
            run_tick(&mut looper, &mut source, &mut sync),
            TickOutcome::EndOfStream
        ));
    }

    #[test]
    fn test_read_errors_are_recoverable_until_persistent() {
        let mut media = MockSource::new(1.0, 25.0, false);
        media.fail_reads_after = Some(1);
        let (mut source, mut sync) = video_only(media);
        let mut looper = DecodeLoop::new();

        assert!(matches!(
            run_tick(&mut looper, &mut source, &mut sync),
            TickOutcome::FrameProduced { .. }
        ));
        for _ in 0..9 {
            assert!(matches!(
                run_tick(&mut looper, &mut source, &mut sync),
                TickOutcome::DecodeError(_)
            ));
        }
        assert!(matches!(
            run_tick(&mut looper, &mut source, &mut sync),
            TickOutcome::EndOfStream
        ));
    }

    #[test]
    fn test_stabilization_window() {
        let (mut source, mut sync) = video_only(MockSource::new(1.0, 25.0, false));
        let mut looper = DecodeLoop::new();
        for _ in 0..STABILIZATION_FRAMES - 1 {
            run_tick(&mut looper, &mut source, &mut sync);
            assert!(!looper.is_stable());
        }
        run_tick(&mut looper, &mut source, &mut sync);
        assert!(looper.is_stable());

        looper.restart_stabilization();
        assert!(!looper.is_stable());
    }

    #[test]
    fn test_find_frame_after_seek_respects_attempt_budget() {
        let mut media = MockSource::new(10.0, 25.0, true);
        media.corrupt_frames = (0..20).collect();
        let (mut source, _) = video_only(media.clone());
        let mut looper = DecodeLoop::new();
        assert!(looper.find_frame_after_seek(&mut source, 0, 10).is_none());
        assert_eq!(media.log.lock().packets_read, 10);

        let (mut clean, _) = video_only(MockSource::new(10.0, 25.0, true));
        let (_, display_us) = looper.find_frame_after_seek(&mut clean, 0, 10).unwrap();
        assert_eq!(display_us, 0);
    }

    #[test]
    fn test_frame_without_pts_after_seek_shows_at_target() {
        let mut media = MockSource::new(180.0, 25.0, true);
        media.missing_pts = true;
        let (mut source, _) = video_only(media);
        source
            .demuxer
            .seek(120_000_000, crate::player::demuxer_source::SeekMode::Direct)
            .unwrap();
        let mut looper = DecodeLoop::new();

        let (frame, display_us) = looper
            .find_frame_after_seek(&mut source, 120_000_000, 10)
            .unwrap();
        assert_eq!(frame.pts_us, None);
        assert_eq!(display_us, 120_000_000);
    }
}
