//! 媒体源获取
//!
//! 打开输入 → 探测流信息 → 选择音视频流 → 打开解码器，每一步之间检查取消标志。
//! 本地文件同步执行（[`SourceAcquirer::open_local`]），网络流由 `stream_loader` 放到工作线程执行。

use crate::core::config::NetworkConfig;
use crate::core::{PlayerError, Result, SourceLocation};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer::{Demuxer, OpenedInput};
use crate::player::demuxer_source::{AudioDecode, DemuxerSource};
use crate::player::media_source::MediaSource;
use crate::player::protocol::{ProtocolSession, StreamConnector};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 获取过程的各个步骤
///
/// 每个方法对应一个可被取消打断的阻塞步骤，调用顺序固定。
pub trait AcquisitionSteps: Send {
    fn open_input(&mut self) -> Result<()>;
    fn find_stream_info(&mut self) -> Result<()>;
    fn select_streams(&mut self) -> Result<()>;
    fn open_decoders(&mut self) -> Result<()>;
    /// 交出全部句柄
    fn finish(self: Box<Self>) -> Result<MediaSource>;
}

/// 步骤构造器：每次获取创建一组新的步骤
pub type AcquisitionFactory = Arc<
    dyn Fn(&SourceLocation, Arc<NetworkConfig>, Arc<AtomicBool>) -> Box<dyn AcquisitionSteps>
        + Send
        + Sync,
>;

/// 进度节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStep {
    Connecting,
    Probing,
    StreamInfo,
    OpeningDecoders,
    Connected,
}

impl AcquireStep {
    /// 对应的进度百分比与提示
    pub fn milestone(&self) -> Option<(u8, &'static str)> {
        match self {
            AcquireStep::Connecting => Some((10, "正在建立连接...")),
            AcquireStep::Probing => Some((40, "正在获取流信息...")),
            AcquireStep::StreamInfo => None,
            AcquireStep::OpeningDecoders => Some((70, "正在设置解码器...")),
            AcquireStep::Connected => Some((100, "连接成功")),
        }
    }
}

/// 获取结果
pub enum AcquireOutcome {
    Ready(MediaSource),
    Failed(PlayerError),
    Cancelled,
}

/// 步骤边界检查：取消优先于步骤本身的结果
fn checkpoint(cancel: &AtomicBool, result: Result<()>) -> Option<AcquireOutcome> {
    if cancel.load(Ordering::SeqCst) {
        return Some(AcquireOutcome::Cancelled);
    }
    result.err().map(AcquireOutcome::Failed)
}

/// 依次执行全部步骤
pub fn run_acquisition(
    mut steps: Box<dyn AcquisitionSteps>,
    cancel: &AtomicBool,
    mut report: impl FnMut(AcquireStep),
) -> AcquireOutcome {
    if let Some(outcome) = checkpoint(cancel, Ok(())) {
        return outcome;
    }

    report(AcquireStep::Connecting);
    if let Some(outcome) = checkpoint(cancel, steps.open_input()) {
        return outcome;
    }

    report(AcquireStep::Probing);
    if let Some(outcome) = checkpoint(cancel, steps.find_stream_info()) {
        return outcome;
    }

    report(AcquireStep::StreamInfo);
    if let Some(outcome) = checkpoint(cancel, steps.select_streams()) {
        return outcome;
    }

    report(AcquireStep::OpeningDecoders);
    if let Some(outcome) = checkpoint(cancel, steps.open_decoders()) {
        return outcome;
    }

    let finished = steps.finish();
    if cancel.load(Ordering::SeqCst) {
        return AcquireOutcome::Cancelled;
    }
    match finished {
        Ok(source) => {
            report(AcquireStep::Connected);
            AcquireOutcome::Ready(source)
        }
        Err(e) => AcquireOutcome::Failed(e),
    }
}

/// 基于 FFmpeg 的获取步骤
pub struct FfmpegAcquisition {
    location: SourceLocation,
    config: Arc<NetworkConfig>,
    cancel: Arc<AtomicBool>,
    session: Option<ProtocolSession>,
    opened: Option<OpenedInput>,
    streams: Option<(usize, Option<usize>)>,
    video: Option<VideoDecoder>,
    audio: Option<AudioDecoder>,
}

impl FfmpegAcquisition {
    pub fn new(location: SourceLocation, config: Arc<NetworkConfig>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            location,
            config,
            cancel,
            session: None,
            opened: None,
            streams: None,
            video: None,
            audio: None,
        }
    }

    fn opened(&mut self) -> Result<&mut OpenedInput> {
        self.opened
            .as_mut()
            .ok_or_else(|| PlayerError::OpenError("输入尚未打开".to_string()))
    }
}

impl AcquisitionSteps for FfmpegAcquisition {
    fn open_input(&mut self) -> Result<()> {
        let opened = match &self.location {
            SourceLocation::LocalFile(path) => {
                if !Path::new(path).exists() {
                    return Err(PlayerError::OpenError(format!("文件不存在: {}", path.display())));
                }
                OpenedInput::open(&path.to_string_lossy(), &[], Some(self.cancel.clone()))?
            }
            SourceLocation::NetworkStream { url, .. } => {
                let mut session = ProtocolSession::new(url, &self.config)?;
                let options = session.connect()?;
                let opened = OpenedInput::open(url, &options, Some(self.cancel.clone()))
                    .map_err(|e| PlayerError::NetworkError(e.to_string()))?;
                self.session = Some(session);
                opened
            }
        };
        self.opened = Some(opened);
        Ok(())
    }

    fn find_stream_info(&mut self) -> Result<()> {
        self.opened()?.find_stream_info()
    }

    fn select_streams(&mut self) -> Result<()> {
        let streams = self.opened()?.select_streams()?;
        self.streams = Some(streams);
        Ok(())
    }

    fn open_decoders(&mut self) -> Result<()> {
        let (video_index, audio_index) = self.streams.ok_or(PlayerError::NoVideoStream)?;
        let opened = self
            .opened
            .as_ref()
            .ok_or_else(|| PlayerError::OpenError("输入尚未打开".to_string()))?;
        let input = opened.input();

        let video_stream = input.stream(video_index).ok_or(PlayerError::NoVideoStream)?;
        self.video = Some(VideoDecoder::from_stream(video_stream)?);

        // 音频解码器失败时降级为纯视频
        self.audio = match audio_index.and_then(|idx| input.stream(idx)) {
            Some(stream) => match AudioDecoder::from_stream(stream) {
                Ok(decoder) => Some(decoder),
                Err(e) => {
                    warn!("⚠️ 音频解码器打开失败，按纯视频播放: {}", e);
                    None
                }
            },
            None => None,
        };
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<MediaSource> {
        let this = *self;
        let (video_index, audio_index) = this.streams.ok_or(PlayerError::NoVideoStream)?;
        let opened = this
            .opened
            .ok_or_else(|| PlayerError::OpenError("输入尚未打开".to_string()))?;
        let video = this
            .video
            .ok_or_else(|| PlayerError::DecoderNotFound("video".to_string()))?;

        let audio_index = if this.audio.is_some() { audio_index } else { None };
        let location = this.location.as_display();
        let demuxer = Demuxer::new(opened, video_index, audio_index, &location)?;
        let info = demuxer.media_info().clone();

        if let Some(mut session) = this.session {
            session.disconnect();
        }

        Ok(MediaSource {
            demuxer: Box::new(demuxer),
            video_decoder: Box::new(video),
            audio_decoder: this.audio.map(|a| Box::new(a) as Box<dyn AudioDecode>),
            info,
            kind: this.location.kind(),
            location,
        })
    }
}

/// FFmpeg 获取步骤的构造器
pub fn ffmpeg_factory() -> AcquisitionFactory {
    Arc::new(
        |location: &SourceLocation, config: Arc<NetworkConfig>, cancel: Arc<AtomicBool>| {
            Box::new(FfmpegAcquisition::new(location.clone(), config, cancel)) as Box<dyn AcquisitionSteps>
        },
    )
}

/// 媒体源获取器
#[derive(Clone)]
pub struct SourceAcquirer {
    factory: AcquisitionFactory,
    config: Arc<NetworkConfig>,
}

impl SourceAcquirer {
    pub fn new(factory: AcquisitionFactory, config: Arc<NetworkConfig>) -> Self {
        Self { factory, config }
    }

    /// 使用 FFmpeg 的获取器
    pub fn ffmpeg(config: Arc<NetworkConfig>) -> Self {
        Self::new(ffmpeg_factory(), config)
    }

    pub fn config(&self) -> &Arc<NetworkConfig> {
        &self.config
    }

    /// 为一次获取构造步骤
    pub fn prepare(&self, location: &SourceLocation, cancel: Arc<AtomicBool>) -> Box<dyn AcquisitionSteps> {
        (self.factory)(location, self.config.clone(), cancel)
    }

    /// 同步打开本地文件
    pub fn open_local(&self, path: &Path) -> Result<MediaSource> {
        let location = SourceLocation::LocalFile(path.to_path_buf());
        info!("📁 打开本地文件: {}", path.display());

        let cancel = Arc::new(AtomicBool::new(false));
        let steps = self.prepare(&location, cancel.clone());
        match run_acquisition(steps, &cancel, |step| debug!("本地打开步骤: {:?}", step)) {
            AcquireOutcome::Ready(source) => Ok(source),
            AcquireOutcome::Failed(e) => Err(e),
            AcquireOutcome::Cancelled => Err(PlayerError::OpenError("打开被取消".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::{MockSource, ScriptedSteps, StepScript};

    fn outcome_name(outcome: &AcquireOutcome) -> &'static str {
        match outcome {
            AcquireOutcome::Ready(_) => "ready",
            AcquireOutcome::Failed(_) => "failed",
            AcquireOutcome::Cancelled => "cancelled",
        }
    }

    #[test]
    fn test_all_steps_reach_ready() {
        let cancel = AtomicBool::new(false);
        let steps = ScriptedSteps::new(StepScript::default(), MockSource::new(120.0, 25.0, true));
        let mut seen = Vec::new();
        let outcome = run_acquisition(Box::new(steps), &cancel, |s| seen.push(s));

        assert_eq!(outcome_name(&outcome), "ready");
        assert_eq!(
            seen,
            vec![
                AcquireStep::Connecting,
                AcquireStep::Probing,
                AcquireStep::StreamInfo,
                AcquireStep::OpeningDecoders,
                AcquireStep::Connected
            ]
        );
    }

    #[test]
    fn test_step_failure_aborts_remaining_steps() {
        let cancel = AtomicBool::new(false);
        let script = StepScript {
            fail_stream_info: true,
            ..StepScript::default()
        };
        let steps = ScriptedSteps::new(script, MockSource::new(10.0, 25.0, false));
        let mut seen = Vec::new();
        let outcome = run_acquisition(Box::new(steps), &cancel, |s| seen.push(s));

        assert_eq!(outcome_name(&outcome), "failed");
        assert_eq!(seen, vec![AcquireStep::Connecting, AcquireStep::Probing]);
    }

    #[test]
    fn test_cancel_wins_over_failure() {
        let cancel = Arc::new(AtomicBool::new(false));
        let script = StepScript {
            fail_open: true,
            cancel_during_open: true,
            ..StepScript::default()
        };
        let steps = ScriptedSteps::new(script, MockSource::new(10.0, 25.0, false))
            .with_cancel(cancel.clone());
        let outcome = run_acquisition(Box::new(steps), &cancel, |_| {});
        assert_eq!(outcome_name(&outcome), "cancelled");
    }

    #[test]
    fn test_missing_local_file_fails_to_open() {
        let acquirer = SourceAcquirer::ffmpeg(Arc::new(NetworkConfig::default()));
        let err = acquirer
            .open_local(Path::new("/definitely/not/here.mp4"))
            .unwrap_err();
        assert!(matches!(err, PlayerError::OpenError(_)));
    }
}
