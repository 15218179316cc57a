//! 音频输出引擎
//!
//! 持有音频解码器和输出设备：把解码后的 S16 采样写入设备，并由 PTS 与墙钟推导音频时钟。
//! 时钟状态放在互斥锁里，只由引擎写入；同步校正器和状态查询通过
//! [`AudioClockReader`] 拷贝读出。

use crate::core::clock::{PlaybackClock, TimeSource};
use crate::core::{PlayerEvent, Result};
use crate::player::audio_output::{AudioSink, SinkFactory};
use crate::player::decoder::ticks_to_us;
use crate::player::demuxer_source::AudioDecode;
use crossbeam_channel::Sender;
use ffmpeg_next::Packet;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// PTS 与外推时钟偏差超过该值时重新锚定（微秒）
pub const REANCHOR_THRESHOLD_US: i64 = 100_000;
/// 设备延迟初始估计（微秒）
pub const INITIAL_DEVICE_LATENCY_US: i64 = 100_000;
/// 连续错误超过该次数后尝试恢复设备
pub const MAX_DEVICE_ERRORS: u32 = 3;
/// 缓冲状态等级上限
pub const BUFFER_LEVEL_MAX: u32 = 10;
/// 每级缓冲对应的时长（微秒）
const BUFFER_LEVEL_STEP_US: u64 = 50_000;
const UNDERRUN_WARN_COUNT: u32 = 50;
const UNDERRUN_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// 音频时钟状态
#[derive(Debug, Clone)]
struct AudioClockState {
    playing: bool,
    paused_at: Option<Instant>,
    last_pts: Option<i64>, // 流时间基
    clock_base_us: i64,    // 锚点处的 PTS（微秒）
    anchor: Option<Instant>,
    accumulated_samples: u64,
    device_latency_us: i64,
    time_base: f64,
    volume: f32,
    error_count: u32,
    processed_frames: u64,
    dropped_frames: u64,
}

impl AudioClockState {
    fn new(time_base: f64) -> Self {
        Self {
            playing: false,
            paused_at: None,
            last_pts: None,
            clock_base_us: 0,
            anchor: None,
            accumulated_samples: 0,
            device_latency_us: INITIAL_DEVICE_LATENCY_US,
            time_base,
            volume: 1.0,
            error_count: 0,
            processed_frames: 0,
            dropped_frames: 0,
        }
    }

    fn elapsed_us(&self, now: Instant) -> i64 {
        self.anchor
            .map(|anchor| now.saturating_duration_since(anchor).as_micros() as i64)
            .unwrap_or(0)
    }

    fn audio_clock(&self, master_us: i64, now: Instant) -> i64 {
        if !self.playing {
            return master_us;
        }
        if let Some(pts) = self.last_pts {
            return ticks_to_us(pts, self.time_base);
        }
        if self.anchor.is_some() {
            // 暂停期间停在暂停时刻
            let now = self.paused_at.unwrap_or(now);
            return (self.clock_base_us + self.elapsed_us(now) - self.device_latency_us).max(0);
        }
        master_us.max(0)
    }
}

/// 音频时钟快照（值类型）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioClockSnapshot {
    pub playing: bool,
    pub paused: bool,
    pub last_pts: Option<i64>,
    pub clock_base_us: i64,
    pub anchored: bool,
    pub accumulated_samples: u64,
    pub device_latency_us: i64,
    pub error_count: u32,
    pub processed_frames: u64,
    pub dropped_frames: u64,
    pub volume: f32,
}

/// 音频时钟只读句柄
#[derive(Clone)]
pub struct AudioClockReader {
    state: Arc<Mutex<AudioClockState>>,
    clock: PlaybackClock,
    time: Arc<dyn TimeSource>,
}

impl AudioClockReader {
    /// 当前音频时间（微秒）
    pub fn audio_clock(&self) -> i64 {
        let now = self.time.now();
        self.state.lock().audio_clock(self.clock.master(), now)
    }

    pub fn snapshot(&self) -> AudioClockSnapshot {
        let state = self.state.lock();
        AudioClockSnapshot {
            playing: state.playing,
            paused: state.paused_at.is_some(),
            last_pts: state.last_pts,
            clock_base_us: state.clock_base_us,
            anchored: state.anchor.is_some(),
            accumulated_samples: state.accumulated_samples,
            device_latency_us: state.device_latency_us,
            error_count: state.error_count,
            processed_frames: state.processed_frames,
            dropped_frames: state.dropped_frames,
            volume: state.volume,
        }
    }
}

/// 欠载告警计数（每个会话独立）
#[derive(Debug, Default)]
struct UnderrunMonitor {
    count: u32,
    last_warning: Option<Instant>,
}

/// 音频输出引擎
pub struct AudioEngine {
    decoder: Box<dyn AudioDecode>,
    sink: Option<Box<dyn AudioSink>>,
    sink_factory: SinkFactory,
    state: Arc<Mutex<AudioClockState>>,
    clock: PlaybackClock,
    time: Arc<dyn TimeSource>,
    events: Sender<PlayerEvent>,
    underruns: UnderrunMonitor,
    recovering: bool,
    /// 恢复失败后不再输出音频（视频继续播放）
    disabled: bool,
}

impl AudioEngine {
    /// 创建引擎并按源格式协商输出设备
    pub fn new(
        mut decoder: Box<dyn AudioDecode>,
        sink_factory: SinkFactory,
        clock: PlaybackClock,
        time: Arc<dyn TimeSource>,
        events: Sender<PlayerEvent>,
    ) -> Result<Self> {
        let (source_rate, source_channels) = decoder.source_format();
        let channels = source_channels.clamp(1, 2);
        let sink = sink_factory(source_rate, channels)?;
        decoder.set_output_format(sink.sample_rate(), sink.channels());

        // 流没有时间基时按源采样率推导
        let time_base = decoder
            .time_base()
            .unwrap_or(1.0 / source_rate.max(1) as f64);

        info!(
            "🔊 音频引擎就绪: {}Hz/{}ch → 设备 {}Hz/{}ch S16",
            source_rate,
            source_channels,
            sink.sample_rate(),
            sink.channels()
        );

        Ok(Self {
            decoder,
            sink: Some(sink),
            sink_factory,
            state: Arc::new(Mutex::new(AudioClockState::new(time_base))),
            clock,
            time,
            events,
            underruns: UnderrunMonitor::default(),
            recovering: false,
            disabled: false,
        })
    }

    pub fn reader(&self) -> AudioClockReader {
        AudioClockReader {
            state: self.state.clone(),
            clock: self.clock.clone(),
            time: self.time.clone(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// 当前音频时间（微秒）
    pub fn get_audio_clock(&self) -> i64 {
        self.state.lock().audio_clock(self.clock.master(), self.time.now())
    }

    pub fn set_master_clock(&self, us: i64) {
        self.clock.set_master(us);
    }

    pub fn start(&mut self) {
        if self.disabled || self.is_playing() {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        if let Err(e) = sink.start() {
            error!("启动音频设备失败: {}", e);
            self.handle_device_error();
            return;
        }

        let mut state = self.state.lock();
        state.playing = true;
        state.paused_at = None;
        state.clock_base_us = 0;
        state.anchor = None;
        state.accumulated_samples = 0;
        drop(state);

        self.underruns = UnderrunMonitor::default();
        info!("▶️ 音频播放开始");
    }

    pub fn pause(&mut self) {
        {
            let mut state = self.state.lock();
            if !state.playing || state.paused_at.is_some() {
                return;
            }
            state.paused_at = Some(self.time.now());
        }

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.pause() {
                warn!("暂停音频设备失败: {}", e);
            }
        }
        debug!("⏸️ 音频暂停");
    }

    pub fn resume(&mut self) {
        let now = self.time.now();
        {
            let mut state = self.state.lock();
            let Some(paused_at) = state.paused_at.take() else {
                return;
            };
            // 锚点顺延暂停的时长，外推时钟不跳变
            if let Some(anchor) = state.anchor {
                state.anchor = Some(anchor + now.saturating_duration_since(paused_at));
            }
        }

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.resume() {
                error!("恢复音频设备失败: {}", e);
                self.handle_device_error();
                return;
            }
        }
        self.underruns = UnderrunMonitor::default();
        debug!("▶️ 音频恢复");
    }

    pub fn stop(&mut self) {
        {
            let mut state = self.state.lock();
            state.playing = false;
            state.paused_at = None;
            state.last_pts = None;
            state.clock_base_us = 0;
            state.anchor = None;
            state.accumulated_samples = 0;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.stop();
            sink.clear();
        }
        self.clock.set_master(0);
        info!("⏹️ 音频播放停止");
    }

    /// 丢弃解码器内部缓冲
    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    /// 跳转：清空设备缓冲，时钟重新锚定到目标位置
    pub fn seek(&mut self, target_us: i64) {
        let now = self.time.now();
        let playing = {
            let mut state = self.state.lock();
            state.last_pts = None;
            state.clock_base_us = target_us;
            state.anchor = Some(now);
            state.accumulated_samples = 0;
            state.paused_at = state.paused_at.map(|_| now);
            state.playing && state.paused_at.is_none()
        };
        self.clock.set_master(target_us);

        if let Some(sink) = self.sink.as_mut() {
            sink.clear();
            if playing {
                sink.stop();
                if let Err(e) = sink.start() {
                    error!("Seek 后重启音频设备失败: {}", e);
                    self.handle_device_error();
                }
            }
        }
        debug!("音频 Seek 到 {}us", target_us);
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.state.lock().volume = volume;
        if let Some(sink) = self.sink.as_mut() {
            sink.set_volume(volume);
        }
    }

    /// 解码并输出一个音频包，返回音频时钟是否更新
    pub fn submit_packet(&mut self, packet: &Packet) -> bool {
        if self.disabled || !self.is_playing() || self.sink.is_none() {
            self.state.lock().dropped_frames += 1;
            return false;
        }

        let frames = match self.decoder.decode(packet) {
            Ok(frames) => frames,
            Err(e) => {
                debug!("音频包解码失败（已跳过）: {}", e);
                self.state.lock().dropped_frames += 1;
                return false;
            }
        };

        let mut clock_updated = false;
        for frame in frames {
            let Some(sink) = self.sink.as_mut() else {
                break;
            };
            match sink.write(&frame.samples) {
                Ok(written) => {
                    let buffered = sink.buffered_bytes();
                    let byte_rate = sink.sample_rate() as u64 * sink.channels() as u64 * 2;

                    let mut state = self.state.lock();
                    state.error_count = 0;
                    state.processed_frames += 1;
                    if written < frame.samples.len() {
                        debug!("设备缓冲已满，丢弃 {} 个采样", frame.samples.len() - written);
                    }
                    if written > 0 {
                        if let Some(pts) = frame.pts {
                            Self::update_clock(&mut state, pts, frame.frames() as u64, self.time.now());
                            Self::adjust_latency(&mut state, buffered, byte_rate);
                            clock_updated = true;
                        }
                    }
                }
                Err(e) => {
                    warn!("音频写入失败: {}", e);
                    self.state.lock().dropped_frames += 1;
                    self.handle_device_error();
                }
            }
        }

        clock_updated
    }

    fn update_clock(state: &mut AudioClockState, pts: i64, samples: u64, now: Instant) {
        if state.last_pts.is_none() {
            debug!("首个音频 PTS: {}", pts);
        }
        state.last_pts = Some(pts);

        let pts_us = ticks_to_us(pts, state.time_base);
        let extrapolated = state.clock_base_us + state.elapsed_us(now);
        if state.anchor.is_none() || (pts_us - extrapolated).abs() > REANCHOR_THRESHOLD_US {
            if state.anchor.is_some() {
                debug!("音频时钟重新锚定: {}us（外推 {}us）", pts_us, extrapolated);
            }
            state.clock_base_us = pts_us;
            state.anchor = Some(now);
            state.accumulated_samples = 0;
        }
        state.accumulated_samples += samples;
    }

    /// 设备缓冲对应的延迟，平滑后更新估计值
    fn adjust_latency(state: &mut AudioClockState, buffered_bytes: usize, byte_rate: u64) {
        if byte_rate == 0 {
            return;
        }
        let calculated = (buffered_bytes as f64 * 1_000_000.0 / byte_rate as f64) as i64;
        state.device_latency_us = (state.device_latency_us * 3 + calculated) / 4;
    }

    fn handle_device_error(&mut self) {
        let count = {
            let mut state = self.state.lock();
            state.error_count += 1;
            state.error_count
        };
        if count > MAX_DEVICE_ERRORS && !self.recovering {
            self.attempt_recovery();
        }
    }

    /// 一次性恢复：停止、重建设备、按需恢复播放
    fn attempt_recovery(&mut self) {
        self.recovering = true;
        warn!("🔧 音频设备连续出错，尝试恢复...");

        let was_playing = self.is_playing();
        let format = self
            .sink
            .as_ref()
            .map(|s| (s.sample_rate(), s.channels()))
            .unwrap_or_else(|| {
                let (rate, ch) = self.decoder.source_format();
                (rate, ch.clamp(1, 2))
            });

        if let Some(mut sink) = self.sink.take() {
            sink.stop();
        }
        self.state.lock().playing = false;

        match (self.sink_factory)(format.0, format.1) {
            Ok(mut sink) => {
                sink.set_volume(self.state.lock().volume);
                self.decoder.set_output_format(sink.sample_rate(), sink.channels());
                self.sink = Some(sink);
                self.state.lock().error_count = 0;
                if was_playing {
                    self.start();
                }
                info!("✅ 音频设备恢复成功");
            }
            Err(e) => {
                error!("❌ 音频设备恢复失败，继续纯视频播放: {}", e);
                self.disabled = true;
                let _ = self
                    .events
                    .send(PlayerEvent::AudioError(format!("音频恢复失败: {}", e)));
            }
        }

        self.recovering = false;
    }

    /// 周期性缓冲检查：上报缓冲等级并统计欠载
    pub fn check_buffer(&mut self) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        {
            let state = self.state.lock();
            if !state.playing || state.paused_at.is_some() {
                return;
            }
        }

        let active = sink.is_active();
        let byte_rate = sink.sample_rate() as u64 * sink.channels() as u64 * 2;
        let buffered_us = if byte_rate > 0 {
            sink.buffered_bytes() as u64 * 1_000_000 / byte_rate
        } else {
            0
        };
        let level = if active {
            ((buffered_us / BUFFER_LEVEL_STEP_US) as u32).clamp(1, BUFFER_LEVEL_MAX)
        } else {
            0
        };

        let _ = self.events.send(PlayerEvent::BufferStatus {
            level,
            max: BUFFER_LEVEL_MAX,
        });

        if level == 0 {
            self.underruns.count += 1;
            let now = self.time.now();
            let quiet = self
                .underruns
                .last_warning
                .map(|t| now.saturating_duration_since(t) > UNDERRUN_WARN_INTERVAL)
                .unwrap_or(true);
            if self.underruns.count > UNDERRUN_WARN_COUNT && quiet {
                warn!("⚠️ 音频缓冲持续不足");
                self.underruns.last_warning = Some(now);
                self.underruns.count = 0;
            }
        } else {
            self.underruns.count = 0;
        }
    }

    pub fn underrun_count(&self) -> u32 {
        self.underruns.count
    }

    pub fn status_info(&self) -> String {
        let state = self.state.lock();
        format!(
            "音频状态 - 播放: {}, 已处理: {}, 已丢弃: {}, 延迟: {}ms",
            if state.playing { "是" } else { "否" },
            state.processed_frames,
            state.dropped_frames,
            state.device_latency_us / 1000
        )
    }
}
