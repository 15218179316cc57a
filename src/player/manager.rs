use crate::core::clock::{SystemTime, TimeSource};
use crate::core::config::PlayerConfig;
use crate::core::scheduler::Scheduler;
use crate::core::{
    MediaInfo, PlaybackClock, PlaybackState, PlayerError, PlayerEvent, PlayerState, Result,
    SourceLocation,
};
use crate::player::audio_engine::AudioEngine;
use crate::player::audio_output::{cpal_sink_factory, SinkFactory};
use crate::player::decode_loop::{DecodeLoop, DecodeStats, TickContext, TickOutcome};
use crate::player::demuxer_source::SeekMode;
use crate::player::media_source::MediaSource;
use crate::player::seek::{clamp_target, choose_mode, SeekAdmission, SeekCoordinator, SeekPhase, SEEK_FRAME_ATTEMPTS};
use crate::player::source_acquirer::{ffmpeg_factory, AcquisitionFactory, SourceAcquirer};
use crate::player::stream_loader::{LoaderEvent, StreamLoader, PROGRESS_INTERVAL};
use crate::player::sync::{SyncCorrector, SyncStats};
use crate::renderer::FrameRenderer;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 音频缓冲检查间隔
const BUFFER_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// 调度器中的具名任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTask {
    DecodeTick,
    Seek,
    BufferCheck,
    LoadTimeout(u64),
    LoadProgress,
}

/// 引擎依赖的外部实现
#[derive(Clone)]
pub struct PlayerBackend {
    pub acquisition: AcquisitionFactory,
    pub sink_factory: SinkFactory,
    pub time: Arc<dyn TimeSource>,
}

impl PlayerBackend {
    /// FFmpeg 解码 + cpal 输出 + 系统时钟
    pub fn ffmpeg() -> Result<Self> {
        ffmpeg_next::init()?;
        info!("✅ FFmpeg 初始化成功");
        Ok(Self {
            acquisition: ffmpeg_factory(),
            sink_factory: cpal_sink_factory(),
            time: Arc::new(SystemTime),
        })
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// 所有命令与调度任务都在持有者线程上执行：宿主反复调用 [`PlaybackManager::pump`]，
/// 到期的解码、Seek、缓冲检查和加载超时任务依次运行，彼此不会并发。
pub struct PlaybackManager {
    config: PlayerConfig,
    acquirer: SourceAcquirer,
    loader: StreamLoader,
    sink_factory: SinkFactory,
    time: Arc<dyn TimeSource>,
    scheduler: Scheduler<EngineTask>,
    clock: PlaybackClock,
    source: Option<MediaSource>,
    audio: Option<AudioEngine>,
    decode: DecodeLoop,
    sync: SyncCorrector,
    seek: SeekCoordinator,
    renderer: Box<dyn FrameRenderer>,
    state: PlaybackState,
    volume: f32,
    /// 当前加载会话已上报的最高进度
    load_progress: u8,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
}

impl PlaybackManager {
    pub fn new(config: PlayerConfig, backend: PlayerBackend, renderer: Box<dyn FrameRenderer>) -> Self {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        let acquirer = SourceAcquirer::new(backend.acquisition, Arc::new(config.network.clone()));
        let loader = StreamLoader::new(acquirer.clone(), backend.time.clone());
        let (events_tx, events_rx) = unbounded();

        Self {
            volume: config.volume.clamp(0.0, 1.0),
            seek: SeekCoordinator::new(config.reject_seek_while_unstable),
            config,
            acquirer,
            loader,
            sink_factory: backend.sink_factory,
            time: backend.time,
            scheduler: Scheduler::new(),
            clock: PlaybackClock::new(),
            source: None,
            audio: None,
            decode: DecodeLoop::new(),
            sync: SyncCorrector::new(crate::core::SourceKind::LocalFile),
            renderer,
            state: PlaybackState::Idle,
            load_progress: 0,
            events_tx,
            events_rx,
        }
    }

    /// 事件接收端（可多次获取，共享同一队列）
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events_tx.send(event);
    }

    // ---------------------------------------------------------------
    // 打开 / 关闭
    // ---------------------------------------------------------------

    /// 同步打开本地文件
    pub fn open_local(&mut self, path: impl AsRef<Path>) -> Result<MediaInfo> {
        let path = path.as_ref();
        if let Some(event) = self.loader.cancel() {
            self.handle_loader_event(event);
        }

        self.state = PlaybackState::Opening;
        match self.acquirer.open_local(path) {
            Ok(source) => Ok(self.install_source(source)),
            Err(e) => {
                error!("{} ❌ 打开本地文件失败: {}", log_ctx(), e);
                // 打开失败不影响已有会话
                self.state = if self.source.is_some() {
                    PlaybackState::Paused
                } else {
                    PlaybackState::Error
                };
                Err(e)
            }
        }
    }

    /// 异步打开网络流，返回加载会话编号
    ///
    /// 当前播放的会话保留到新源就绪为止。
    pub fn open_remote(&mut self, url: &str, timeout_ms: Option<u64>) -> Result<u64> {
        let location = SourceLocation::parse(url);
        if !location.is_network_stream() {
            return Err(PlayerError::InvalidUrl(url.to_string()));
        }

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.config.remote_timeout_ms));
        for event in self.loader.begin(location, timeout) {
            self.handle_loader_event(event);
        }

        let session = self
            .loader
            .session()
            .map(|s| s.id())
            .ok_or_else(|| PlayerError::NetworkError("加载会话未创建".to_string()))?;

        if self.loader.is_loading() {
            let now = self.time.now();
            self.load_progress = 0;
            self.scheduler
                .schedule_once(EngineTask::LoadTimeout(session), timeout, now);
            self.scheduler
                .schedule_periodic(EngineTask::LoadProgress, PROGRESS_INTERVAL, now);
        }
        Ok(session)
    }

    /// 取消进行中的网络流加载
    pub fn cancel_load(&mut self) {
        if let Some(event) = self.loader.cancel() {
            self.handle_loader_event(event);
        }
    }

    /// 接管新的媒体源（旧会话在此释放）
    fn install_source(&mut self, mut source: MediaSource) -> MediaInfo {
        self.release_session();

        let audio_decoder = source.audio_decoder.take();
        self.audio = audio_decoder.and_then(|decoder| {
            match AudioEngine::new(
                decoder,
                self.sink_factory.clone(),
                self.clock.clone(),
                self.time.clone(),
                self.events_tx.clone(),
            ) {
                Ok(mut engine) => {
                    engine.set_volume(self.volume);
                    Some(engine)
                }
                Err(e) => {
                    warn!("{} ⚠️ 音频输出初始化失败，按纯视频播放: {}", log_ctx(), e);
                    let _ = self.events_tx.send(PlayerEvent::AudioError(e.to_string()));
                    None
                }
            }
        });

        let mut info = source.info.clone();
        info.has_audio = self.audio.is_some();
        source.info.has_audio = info.has_audio;

        self.sync = SyncCorrector::new(source.kind);
        self.decode = DecodeLoop::new();
        self.seek.reset();
        self.clock.reset(0);
        self.state = PlaybackState::Paused;

        info!(
            "{} ✅ 媒体源就绪: {} ({:.1}s, {}x{} @ {:.2}fps, 音频: {})",
            log_ctx(),
            source.location,
            info.duration_seconds(),
            info.width,
            info.height,
            info.fps,
            if info.has_audio { "有" } else { "无" }
        );
        self.source = Some(source);

        self.emit(PlayerEvent::StreamReady {
            duration_us: info.duration_us,
            fps: info.fps,
            width: info.width,
            height: info.height,
            has_audio: info.has_audio,
        });
        self.emit(PlayerEvent::PositionChanged(0));
        info
    }

    fn release_session(&mut self) {
        self.scheduler.cancel(EngineTask::DecodeTick);
        self.scheduler.cancel(EngineTask::Seek);
        self.scheduler.cancel(EngineTask::BufferCheck);
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        if let Some(source) = self.source.take() {
            info!("{} 🧹 释放媒体源: {}", log_ctx(), source.location);
        }
        self.seek.reset();
        self.clock.reset(0);
    }

    /// 关闭当前媒体源和进行中的加载
    pub fn close(&mut self) {
        self.cancel_load();
        self.release_session();
        self.state = PlaybackState::Idle;
        info!("{} ⏏️ 已关闭", log_ctx());
    }

    // ---------------------------------------------------------------
    // 播放控制
    // ---------------------------------------------------------------

    pub fn play(&mut self) -> Result<()> {
        let source = self.source.as_ref().ok_or(PlayerError::NotLoaded)?;
        if self.state == PlaybackState::Playing {
            return Ok(());
        }
        let interval = Duration::from_millis(source.frame_interval_ms());

        info!("{} 🎬 播放", log_ctx());
        if let Some(audio) = self.audio.as_mut() {
            if audio.is_playing() {
                audio.resume();
            } else {
                audio.start();
            }
        }

        let now = self.time.now();
        self.decode.restart_stabilization();
        self.scheduler
            .schedule_periodic(EngineTask::DecodeTick, interval, now);
        if self.audio.is_some() {
            self.scheduler
                .schedule_periodic(EngineTask::BufferCheck, BUFFER_CHECK_INTERVAL, now);
        }
        self.state = PlaybackState::Playing;
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        info!("{} ⏸️ 暂停", log_ctx());
        self.scheduler.cancel(EngineTask::DecodeTick);
        self.scheduler.cancel(EngineTask::BufferCheck);
        if let Some(audio) = self.audio.as_mut() {
            audio.pause();
        }
        self.state = PlaybackState::Paused;
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Paused | PlaybackState::Stopped => self.play(),
            PlaybackState::Playing => Ok(()),
            _ => Err(PlayerError::NotLoaded),
        }
    }

    /// 停止：回到开头，保留媒体源以便重新播放
    pub fn stop(&mut self) {
        info!("{} ⏹️ 停止播放", log_ctx());
        self.scheduler.cancel(EngineTask::DecodeTick);
        self.scheduler.cancel(EngineTask::Seek);
        self.scheduler.cancel(EngineTask::BufferCheck);
        self.seek.reset();

        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
            audio.flush();
        }
        if let Some(source) = self.source.as_mut() {
            if let Err(e) = source.demuxer.seek(0, SeekMode::KeyframeBackward) {
                warn!("{} 停止时回到开头失败: {}", log_ctx(), e);
            }
            source.video_decoder.flush();
        }
        self.decode.reset();
        self.clock.reset(0);

        if self.source.is_some() {
            self.state = PlaybackState::Stopped;
        }
        self.emit(PlayerEvent::PositionChanged(0));
    }

    /// 请求跳转（秒）
    pub fn seek(&mut self, seconds: f64) -> Result<SeekAdmission> {
        if self.source.is_none() {
            return Err(PlayerError::NotLoaded);
        }
        let now = self.time.now();
        let admission = self.seek.request(seconds, now, self.decode.is_stable());
        match admission {
            SeekAdmission::Scheduled(delay) => {
                self.scheduler.schedule_once(EngineTask::Seek, delay, now);
            }
            SeekAdmission::DroppedInProgress | SeekAdmission::RejectedUnstable => {
                debug!("{} Seek 请求未执行: {:?}", log_ctx(), admission);
            }
        }
        Ok(admission)
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(audio) = self.audio.as_mut() {
            audio.set_volume(self.volume);
        }
    }

    // ---------------------------------------------------------------
    // 调度
    // ---------------------------------------------------------------

    /// 处理加载消息并执行所有到期任务，返回执行的任务数
    pub fn pump(&mut self) -> usize {
        for event in self.loader.poll() {
            self.handle_loader_event(event);
        }

        let now = self.time.now();
        let mut executed = 0;
        while let Some(task) = self.scheduler.pop_due(now) {
            executed += 1;
            match task {
                EngineTask::DecodeTick => self.on_decode_tick(),
                EngineTask::Seek => self.perform_seek(),
                EngineTask::BufferCheck => {
                    if let Some(audio) = self.audio.as_mut() {
                        audio.check_buffer();
                    }
                }
                EngineTask::LoadTimeout(session) => {
                    if let Some(event) = self.loader.on_timeout(session) {
                        self.handle_loader_event(event);
                    }
                }
                EngineTask::LoadProgress => self.on_load_progress(),
            }
        }
        executed
    }

    /// 下一个任务的截止时间（宿主据此休眠）
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    fn on_decode_tick(&mut self) {
        let Some(source) = self.source.as_mut() else {
            self.scheduler.cancel(EngineTask::DecodeTick);
            return;
        };

        let outcome = self.decode.tick(TickContext {
            source,
            audio: self.audio.as_mut(),
            sync: &mut self.sync,
            clock: &self.clock,
            now: self.time.now(),
        });

        match outcome {
            TickOutcome::FrameProduced { frame, display_us } => {
                self.renderer
                    .on_frame_decoded(&frame, frame.width, frame.height, display_us);
                if self.clock.advance_position(display_us) {
                    self.emit(PlayerEvent::PositionChanged(display_us));
                }
            }
            TickOutcome::EndOfStream => {
                info!("{} 🏁 播放结束", log_ctx());
                self.emit(PlayerEvent::EndOfStream);
                self.stop();
            }
            TickOutcome::DecodeError(e) => {
                warn!("{} 读取数据包失败（继续播放）: {}", log_ctx(), e);
            }
        }
    }

    /// 执行待定的 Seek
    fn perform_seek(&mut self) {
        let Some(request) = self.seek.begin() else {
            return;
        };
        let Some(source) = self.source.as_mut() else {
            self.seek.complete();
            return;
        };

        let previous_state = self.state;
        let was_playing = previous_state == PlaybackState::Playing;
        self.state = PlaybackState::Seeking;
        self.scheduler.cancel(EngineTask::DecodeTick);

        let target = clamp_target(request.target_seconds, source.info.duration_us);
        let current = self.clock.position();
        let mode = choose_mode(current, target);
        info!(
            "{} 🎯 Seek: {:.3}s → {:.3}s ({:?})",
            log_ctx(),
            current as f64 / 1_000_000.0,
            target as f64 / 1_000_000.0,
            mode
        );

        match source.demuxer.seek(target, mode) {
            Ok(()) => {
                source.video_decoder.flush();
                if let Some(audio) = self.audio.as_mut() {
                    audio.flush();
                    audio.seek(target);
                }
                self.decode.reset();
                self.clock.reset(target);

                let position = match self.decode.find_frame_after_seek(source, target, SEEK_FRAME_ATTEMPTS) {
                    Some((frame, display_us)) => {
                        self.renderer
                            .on_frame_decoded(&frame, frame.width, frame.height, display_us);
                        self.clock.advance_position(display_us);
                        display_us
                    }
                    None => {
                        debug!("{} Seek 后 {} 次读包内没有可显示帧，使用目标位置", log_ctx(), SEEK_FRAME_ATTEMPTS);
                        target
                    }
                };
                info!("{} ✅ Seek 完成: {:.3}s", log_ctx(), position as f64 / 1_000_000.0);
                let _ = self.events_tx.send(PlayerEvent::PositionChanged(position));
            }
            Err(e) => {
                error!("{} ❌ Seek 失败，位置保持不变: {}", log_ctx(), e);
            }
        }

        self.state = previous_state;
        if was_playing {
            if let Some(source) = self.source.as_ref() {
                let interval = Duration::from_millis(source.frame_interval_ms());
                self.decode.restart_stabilization();
                self.scheduler
                    .schedule_periodic(EngineTask::DecodeTick, interval, self.time.now());
            }
        }
        self.seek.complete();
    }

    fn on_load_progress(&mut self) {
        match self.loader.progress_estimate() {
            Some((percent, message)) => {
                if percent > self.load_progress {
                    self.load_progress = percent;
                    self.emit(PlayerEvent::LoadingProgress {
                        percent,
                        message: message.to_string(),
                    });
                }
            }
            None => {
                self.scheduler.cancel(EngineTask::LoadProgress);
            }
        }
    }

    fn finish_load(&mut self, session: u64) {
        self.scheduler.cancel(EngineTask::LoadTimeout(session));
        if !self.loader.is_loading() {
            self.scheduler.cancel(EngineTask::LoadProgress);
        }
    }

    fn handle_loader_event(&mut self, event: LoaderEvent) {
        match event {
            LoaderEvent::Started { .. } => self.emit(PlayerEvent::LoadingStarted),
            LoaderEvent::Progress { percent, message, .. } => {
                self.load_progress = self.load_progress.max(percent);
                self.emit(PlayerEvent::LoadingProgress { percent, message });
            }
            LoaderEvent::Ready { session, source } => {
                self.finish_load(session);
                self.install_source(source);
            }
            LoaderEvent::Failed { session, reason } => {
                self.finish_load(session);
                self.emit(PlayerEvent::LoadingFailed(reason));
            }
            LoaderEvent::Timeout { session } => {
                self.finish_load(session);
                self.emit(PlayerEvent::LoadingFailed("连接超时".to_string()));
            }
            LoaderEvent::Cancelled { session } => {
                self.finish_load(session);
                self.emit(PlayerEvent::LoadingCancelled);
            }
        }
    }

    // ---------------------------------------------------------------
    // 查询
    // ---------------------------------------------------------------

    pub fn state(&self) -> PlayerState {
        let info = self.source.as_ref().map(|s| s.info.clone());
        PlayerState {
            state: self.state,
            position_us: self.clock.position(),
            duration_us: info.as_ref().map(|i| i.duration_us).unwrap_or(0),
            volume: self.volume,
            media_info: info,
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state
    }

    pub fn position_us(&self) -> i64 {
        self.clock.position()
    }

    /// 音频时钟（无音频时为 None）
    pub fn audio_clock_us(&self) -> Option<i64> {
        self.audio.as_ref().map(|a| a.get_audio_clock())
    }

    pub fn audio_status(&self) -> Option<String> {
        self.audio.as_ref().map(|a| a.status_info())
    }

    pub fn loader(&self) -> &StreamLoader {
        &self.loader
    }

    pub fn seek_phase(&self) -> SeekPhase {
        self.seek.phase()
    }

    pub fn decode_stats(&self) -> DecodeStats {
        self.decode.stats()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualTime;
    use crate::player::testing::{scripted_factory, MockAudioDevice, MockSource, RecordingRenderer, StepScript};

    struct Harness {
        player: PlaybackManager,
        time: Arc<ManualTime>,
        device: MockAudioDevice,
        media: MockSource,
        renderer: RecordingRenderer,
        events: Receiver<PlayerEvent>,
    }

    fn harness(media: MockSource) -> Harness {
        let time = Arc::new(ManualTime::new());
        let device = MockAudioDevice::new();
        let renderer = RecordingRenderer::new();
        let backend = PlayerBackend {
            acquisition: scripted_factory(StepScript::default(), media.clone()),
            sink_factory: device.factory(),
            time: time.clone(),
        };
        let player = PlaybackManager::new(PlayerConfig::default(), backend, Box::new(renderer.clone()));
        let events = player.events();
        Harness {
            player,
            time,
            device,
            media,
            renderer,
            events,
        }
    }

    fn advance(h: &mut Harness, ms: u64) {
        for _ in 0..ms / 10 {
            h.time.advance_ms(10);
            h.player.pump();
        }
    }

    #[test]
    fn test_commands_require_a_source() {
        let mut h = harness(MockSource::new(10.0, 25.0, true));
        assert!(matches!(h.player.play(), Err(PlayerError::NotLoaded)));
        assert!(matches!(h.player.seek(1.0), Err(PlayerError::NotLoaded)));
        assert!(matches!(
            h.player.open_remote("movie.mp4", None),
            Err(PlayerError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_open_and_play_renders_frames_on_schedule() {
        let mut h = harness(MockSource::new(10.0, 25.0, true));
        let info = h.player.open_local("movie.mp4").unwrap();
        assert!(info.has_audio);
        assert!(matches!(h.events.try_recv(), Ok(PlayerEvent::StreamReady { has_audio: true, .. })));

        h.player.play().unwrap();
        advance(&mut h, 400);
        assert_eq!(h.renderer.count(), 10);
        assert_eq!(h.player.position_us(), 360_000);
        assert_eq!(h.device.state.lock().starts, 1);

        h.player.pause();
        advance(&mut h, 400);
        assert_eq!(h.renderer.count(), 10);

        h.player.resume().unwrap();
        advance(&mut h, 40);
        assert_eq!(h.renderer.count(), 11);
        assert_eq!(h.device.state.lock().resumes, 1);
    }

    #[test]
    fn test_rapid_seeks_execute_once_at_latest_target() {
        let mut h = harness(MockSource::new(120.0, 25.0, true));
        h.player.open_local("movie.mp4").unwrap();
        h.player.play().unwrap();
        advance(&mut h, 100);

        h.player.seek(10.0).unwrap();
        h.time.advance_ms(10);
        h.player.seek(30.0).unwrap();
        h.player.pump();
        assert!(h.media.log.lock().seeks.is_empty());

        advance(&mut h, 50);
        let seeks = h.media.log.lock().seeks.clone();
        assert_eq!(seeks, vec![(30_000_000, SeekMode::KeyframeBackward)]);
        assert_eq!(h.player.seek_phase(), SeekPhase::Idle);
    }

    #[test]
    fn test_failed_seek_keeps_position() {
        let mut media = MockSource::new(120.0, 25.0, false);
        media.fail_seek = true;
        let mut h = harness(media);
        h.player.open_local("movie.mp4").unwrap();
        h.player.play().unwrap();
        advance(&mut h, 200);
        let before = h.player.position_us();

        h.player.seek(50.0).unwrap();
        h.player.pump();
        assert_eq!(h.player.position_us(), before);
        assert!(h.player.is_playing());

        advance(&mut h, 40);
        assert!(h.player.position_us() > before);
    }

    #[test]
    fn test_end_of_stream_stops_at_zero_and_can_replay() {
        let mut h = harness(MockSource::new(0.4, 25.0, true));
        h.player.open_local("short.mp4").unwrap();
        h.player.play().unwrap();
        advance(&mut h, 600);

        assert_eq!(h.player.playback_state(), PlaybackState::Stopped);
        assert_eq!(h.player.position_us(), 0);
        assert!(h.events.try_iter().any(|e| e == PlayerEvent::EndOfStream));

        h.player.play().unwrap();
        advance(&mut h, 40);
        assert_eq!(h.renderer.last(), Some(0));
    }

    #[test]
    fn test_audio_device_failure_falls_back_to_video_only() {
        let mut h = harness(MockSource::new(10.0, 25.0, true));
        h.device.state.lock().fail_create = true;
        let info = h.player.open_local("movie.mp4").unwrap();
        assert!(!info.has_audio);
        assert!(matches!(h.events.try_recv(), Ok(PlayerEvent::AudioError(_))));
        assert_eq!(h.player.audio_clock_us(), None);

        h.player.play().unwrap();
        advance(&mut h, 80);
        assert_eq!(h.renderer.count(), 2);
    }

    #[test]
    fn test_volume_is_clamped_and_applied() {
        let mut h = harness(MockSource::new(10.0, 25.0, true));
        h.player.set_volume(2.0);
        h.player.open_local("movie.mp4").unwrap();
        assert_eq!(h.device.state.lock().volume, 1.0);
        h.player.set_volume(0.25);
        assert_eq!(h.device.state.lock().volume, 0.25);
        assert_eq!(h.player.state().volume, 0.25);
    }
}
