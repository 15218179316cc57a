//! 模拟实现：不依赖媒体文件与音频设备驱动整个引擎
//!
//! 单元测试和 `tests/` 集成测试共用。

use crate::core::config::NetworkConfig;
use crate::core::{
    AudioFrame, MediaInfo, PixelFormat, PlayerError, Result, SourceKind, SourceLocation, VideoFrame,
};
use crate::player::audio_output::{AudioSink, SinkFactory};
use crate::player::demuxer_source::{
    AudioDecode, DemuxerSource, MediaPacket, PacketType, SeekMode, VideoDecode,
};
use crate::player::media_source::MediaSource;
use crate::player::source_acquirer::{AcquisitionFactory, AcquisitionSteps};
use crate::renderer::FrameRenderer;
use ffmpeg_next as ffmpeg;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;
/// 损坏包的标记字节
const CORRUPT: u8 = 0xFF;
/// 关键帧间隔（帧）
const GOP: i64 = 50;

/// 模拟媒体共享的观测记录
#[derive(Debug, Default)]
pub struct MediaLog {
    pub seeks: Vec<(i64, SeekMode)>,
    pub video_flushes: usize,
    pub audio_flushes: usize,
    pub packets_read: usize,
}

/// 模拟媒体描述
///
/// 视频包 PTS 以微秒为时间基；音频包 PTS 以 1/sample_rate 为时间基，
/// 每个视频帧前放一个等长的音频包。
#[derive(Clone)]
pub struct MockSource {
    pub duration_us: i64,
    pub fps: f64,
    pub with_audio: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub corrupt_frames: Vec<i64>,
    pub decoder_delay: usize,
    pub fail_seek: bool,
    pub fail_reads_after: Option<usize>,
    /// 视频包不带 PTS
    pub missing_pts: bool,
    pub log: Arc<Mutex<MediaLog>>,
}

impl MockSource {
    pub fn new(duration_s: f64, fps: f64, with_audio: bool) -> Self {
        Self {
            duration_us: (duration_s * 1_000_000.0) as i64,
            fps,
            with_audio,
            sample_rate: 48_000,
            channels: 2,
            corrupt_frames: Vec::new(),
            decoder_delay: 0,
            fail_seek: false,
            fail_reads_after: None,
            missing_pts: false,
            log: Arc::new(Mutex::new(MediaLog::default())),
        }
    }

    pub fn frame_duration_us(&self) -> i64 {
        (1_000_000.0 / self.fps) as i64
    }

    pub fn info(&self) -> MediaInfo {
        MediaInfo {
            duration_us: self.duration_us,
            width: 320,
            height: 240,
            fps: self.fps,
            video_codec: "mock".to_string(),
            audio_codec: if self.with_audio { "mock".to_string() } else { "none".to_string() },
            sample_rate: if self.with_audio { self.sample_rate } else { 0 },
            channels: if self.with_audio { self.channels } else { 0 },
            has_audio: self.with_audio,
        }
    }

    pub fn audio_decoder(&self) -> Box<dyn AudioDecode> {
        Box::new(MockAudioDecoder {
            source_rate: self.sample_rate,
            source_channels: self.channels,
            out_rate: self.sample_rate,
            out_channels: self.channels,
            log: self.log.clone(),
        })
    }

    pub fn into_source(self, kind: SourceKind, location: &str) -> MediaSource {
        let info = self.info();
        let audio_decoder = self.with_audio.then(|| self.audio_decoder());
        let video_decoder = Box::new(MockVideoDecoder {
            delay: self.decoder_delay,
            pending: VecDeque::new(),
            log: self.log.clone(),
        });
        MediaSource {
            demuxer: Box::new(MockDemuxer::new(self)),
            video_decoder,
            audio_decoder,
            info,
            kind,
            location: location.to_string(),
        }
    }
}

/// 模拟解封装器
pub struct MockDemuxer {
    media: MockSource,
    info: MediaInfo,
    next_frame: i64,
    audio_sent: bool,
    reads: usize,
}

impl MockDemuxer {
    pub fn new(media: MockSource) -> Self {
        let info = media.info();
        Self {
            media,
            info,
            next_frame: 0,
            audio_sent: false,
            reads: 0,
        }
    }

    fn total_frames(&self) -> i64 {
        self.media.duration_us / self.media.frame_duration_us()
    }
}

impl DemuxerSource for MockDemuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        self.reads += 1;
        self.media.log.lock().packets_read += 1;
        if let Some(limit) = self.media.fail_reads_after {
            if self.reads > limit {
                return Err(PlayerError::DecodeError("模拟读取失败".to_string()));
            }
        }

        if self.next_frame >= self.total_frames() {
            return Ok(None);
        }

        let frame_us = self.media.frame_duration_us();
        let pts_us = self.next_frame * frame_us;

        if self.media.with_audio && !self.audio_sent {
            self.audio_sent = true;
            let samples_per_frame = self.media.sample_rate as i64 * frame_us / 1_000_000;
            return Ok(Some(MediaPacket {
                packet: audio_packet(self.next_frame * samples_per_frame, samples_per_frame),
                packet_type: PacketType::Audio,
                stream_index: AUDIO_INDEX,
            }));
        }

        let marker = if self.media.corrupt_frames.contains(&self.next_frame) {
            CORRUPT
        } else {
            0
        };
        let mut packet = ffmpeg::Packet::copy(&[marker; 4]);
        packet.set_pts((!self.media.missing_pts).then_some(pts_us));
        packet.set_duration(frame_us);
        packet.set_stream(VIDEO_INDEX);

        self.next_frame += 1;
        self.audio_sent = false;

        Ok(Some(MediaPacket {
            packet,
            packet_type: PacketType::Video,
            stream_index: VIDEO_INDEX,
        }))
    }

    fn seek(&mut self, target_us: i64, mode: SeekMode) -> Result<()> {
        self.media.log.lock().seeks.push((target_us, mode));
        if self.media.fail_seek {
            return Err(PlayerError::SeekError("模拟 Seek 失败".to_string()));
        }
        let frame = target_us.max(0) / self.media.frame_duration_us();
        self.next_frame = match mode {
            SeekMode::Direct => frame,
            SeekMode::KeyframeBackward => frame / GOP * GOP,
        };
        self.audio_sent = false;
        Ok(())
    }

    fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    fn video_stream_index(&self) -> usize {
        VIDEO_INDEX
    }

    fn audio_stream_index(&self) -> Option<usize> {
        self.media.with_audio.then_some(AUDIO_INDEX)
    }

    fn description(&self) -> String {
        "Mock Demuxer".to_string()
    }
}

/// 构造音频包（PTS 以采样为单位）
pub fn audio_packet(pts: i64, samples: i64) -> ffmpeg::Packet {
    let mut packet = ffmpeg::Packet::copy(&[0u8; 4]);
    packet.set_pts(Some(pts));
    packet.set_duration(samples);
    packet.set_stream(AUDIO_INDEX);
    packet
}

/// 模拟视频解码器：包 PTS 即帧 PTS（微秒），可模拟解码延迟
pub struct MockVideoDecoder {
    delay: usize,
    pending: VecDeque<VideoFrame>,
    log: Arc<Mutex<MediaLog>>,
}

fn mock_frame(pts_us: Option<i64>) -> VideoFrame {
    VideoFrame {
        pts_us,
        width: 320,
        height: 240,
        format: PixelFormat::YUV420P,
        planes: vec![vec![16u8; 320 * 240], vec![128u8; 160 * 120], vec![128u8; 160 * 120]],
        strides: vec![320, 160, 160],
    }
}

impl VideoDecode for MockVideoDecoder {
    fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<VideoFrame>> {
        if packet.data().map(|d| d.first() == Some(&CORRUPT)).unwrap_or(false) {
            return Err(PlayerError::DecodeError("模拟损坏包".to_string()));
        }
        self.pending.push_back(mock_frame(packet.pts()));
        if self.pending.len() > self.delay {
            Ok(self.pending.pop_front().into_iter().collect())
        } else {
            Ok(Vec::new())
        }
    }

    fn drain(&mut self) -> Result<Vec<VideoFrame>> {
        Ok(self.pending.drain(..).collect())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.log.lock().video_flushes += 1;
    }
}

/// 模拟音频解码器：每包输出一帧静音
pub struct MockAudioDecoder {
    source_rate: u32,
    source_channels: u16,
    out_rate: u32,
    out_channels: u16,
    log: Arc<Mutex<MediaLog>>,
}

impl AudioDecode for MockAudioDecoder {
    fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<AudioFrame>> {
        let source_samples = packet.duration().max(0) as u64;
        let frames = source_samples * self.out_rate as u64 / self.source_rate.max(1) as u64;
        Ok(vec![AudioFrame {
            pts: packet.pts(),
            sample_rate: self.out_rate,
            channels: self.out_channels,
            samples: vec![0; frames as usize * self.out_channels as usize],
        }])
    }

    fn flush(&mut self) {
        self.log.lock().audio_flushes += 1;
    }

    fn set_output_format(&mut self, sample_rate: u32, channels: u16) {
        self.out_rate = sample_rate;
        self.out_channels = channels.clamp(1, 2);
    }

    fn source_format(&self) -> (u32, u16) {
        (self.source_rate, self.source_channels)
    }

    fn time_base(&self) -> Option<f64> {
        Some(1.0 / self.source_rate as f64)
    }
}

/// 模拟音频设备的可观测状态
#[derive(Debug, Default)]
pub struct SinkState {
    pub created: usize,
    pub starts: usize,
    pub pauses: usize,
    pub resumes: usize,
    pub stops: usize,
    pub clears: usize,
    pub written_samples: usize,
    pub volume: f32,
    pub active: bool,
    /// 写入前还要失败的次数
    pub fail_writes: usize,
    /// 之后的创建全部失败
    pub fail_create: bool,
    /// 模拟设备缓冲的字节数
    pub buffered_bytes: usize,
    pub last_format: Option<(u32, u16)>,
}

/// 模拟音频设备
#[derive(Clone, Default)]
pub struct MockAudioDevice {
    pub state: Arc<Mutex<SinkState>>,
    /// 设备支持的采样率；为 None 时接受任意采样率
    pub supported_rate: Option<u32>,
}

impl MockAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> SinkFactory {
        let device = self.clone();
        Arc::new(move |rate, channels| {
            let mut state = device.state.lock();
            if state.fail_create {
                return Err(PlayerError::AudioError("模拟设备创建失败".to_string()));
            }
            state.created += 1;
            let rate = match device.supported_rate {
                Some(supported) if supported != rate => 44_100,
                _ => rate,
            };
            state.last_format = Some((rate, channels));
            Ok(Box::new(MockSink {
                rate,
                channels,
                state: device.state.clone(),
            }) as Box<dyn AudioSink>)
        })
    }
}

pub struct MockSink {
    rate: u32,
    channels: u16,
    state: Arc<Mutex<SinkState>>,
}

impl AudioSink for MockSink {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.starts += 1;
        state.active = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.pauses += 1;
        state.active = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.resumes += 1;
        state.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.stops += 1;
        state.active = false;
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(PlayerError::AudioError("模拟写入失败".to_string()));
        }
        state.written_samples += samples.len();
        Ok(samples.len())
    }

    fn buffered_bytes(&self) -> usize {
        self.state.lock().buffered_bytes
    }

    fn clear(&mut self) {
        self.state.lock().clears += 1;
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().volume = volume;
    }

    fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

/// 获取步骤脚本
#[derive(Debug, Clone, Default)]
pub struct StepScript {
    pub fail_open: bool,
    pub fail_stream_info: bool,
    pub no_video: bool,
    pub fail_audio_decoder: bool,
    /// 探测阻塞直到取消标志置位
    pub block_stream_info: bool,
    /// 打开输入时置位取消标志
    pub cancel_during_open: bool,
    /// 每步耗时
    pub step_delay: Duration,
}

/// 按脚本执行的获取步骤
pub struct ScriptedSteps {
    script: StepScript,
    media: MockSource,
    cancel: Arc<AtomicBool>,
    kind: SourceKind,
    location: String,
}

impl ScriptedSteps {
    pub fn new(script: StepScript, media: MockSource) -> Self {
        Self {
            script,
            media,
            cancel: Arc::new(AtomicBool::new(false)),
            kind: SourceKind::LocalFile,
            location: "mock://media".to_string(),
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_location(mut self, location: &SourceLocation) -> Self {
        self.kind = location.kind();
        self.location = location.as_display();
        self
    }

    fn pause(&self) {
        if !self.script.step_delay.is_zero() {
            thread::sleep(self.script.step_delay);
        }
    }
}

impl AcquisitionSteps for ScriptedSteps {
    fn open_input(&mut self) -> Result<()> {
        self.pause();
        if self.script.cancel_during_open {
            self.cancel.store(true, Ordering::SeqCst);
        }
        if self.script.fail_open {
            return Err(PlayerError::OpenError("模拟打开失败".to_string()));
        }
        Ok(())
    }

    fn find_stream_info(&mut self) -> Result<()> {
        self.pause();
        if self.script.block_stream_info {
            while !self.cancel.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
            return Err(PlayerError::NetworkError("探测被中断".to_string()));
        }
        if self.script.fail_stream_info {
            return Err(PlayerError::OpenError("模拟探测失败".to_string()));
        }
        Ok(())
    }

    fn select_streams(&mut self) -> Result<()> {
        self.pause();
        if self.script.no_video {
            return Err(PlayerError::NoVideoStream);
        }
        Ok(())
    }

    fn open_decoders(&mut self) -> Result<()> {
        self.pause();
        if self.script.fail_audio_decoder {
            self.media.with_audio = false;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<MediaSource> {
        Ok(self.media.into_source(self.kind, &self.location))
    }
}

/// 每次获取都按同一脚本、以新的模拟媒体执行
pub fn scripted_factory(script: StepScript, media: MockSource) -> AcquisitionFactory {
    Arc::new(move |location: &SourceLocation, _config: Arc<NetworkConfig>, cancel: Arc<AtomicBool>| {
        Box::new(
            ScriptedSteps::new(script.clone(), media.clone())
                .with_cancel(cancel)
                .with_location(location),
        ) as Box<dyn AcquisitionSteps>
    })
}

/// 记录每次渲染的显示时间戳
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    pub frames: Arc<Mutex<Vec<i64>>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<i64> {
        self.frames.lock().last().copied()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl FrameRenderer for RecordingRenderer {
    fn on_frame_decoded(&mut self, _frame: &VideoFrame, _width: u32, _height: u32, display_ts_us: i64) {
        self.frames.lock().push(display_ts_us);
    }
}
