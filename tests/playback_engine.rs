use myy_sync_player::core::clock::ManualTime;
use myy_sync_player::core::config::{NetworkConfig, PlayerConfig};
use myy_sync_player::core::{PlaybackState, PlayerEvent};
use myy_sync_player::player::demuxer_source::SeekMode;
use myy_sync_player::player::seek::{SeekAdmission, SeekPhase, SEEK_DEBOUNCE_DELAY};
use myy_sync_player::player::stream_loader::LoadingStatus;
use myy_sync_player::core::SourceLocation;
use myy_sync_player::player::source_acquirer::{AcquisitionFactory, AcquisitionSteps};
use myy_sync_player::player::testing::{
    scripted_factory, MockAudioDevice, MockSource, RecordingRenderer, ScriptedSteps, StepScript,
};
use myy_sync_player::{PlaybackManager, PlayerBackend};
use crossbeam_channel::Receiver;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Rig {
    player: PlaybackManager,
    time: Arc<ManualTime>,
    media: MockSource,
    device: MockAudioDevice,
    renderer: RecordingRenderer,
    events: Receiver<PlayerEvent>,
}

fn rig_with(media: MockSource, script: StepScript, config: PlayerConfig) -> Rig {
    let factory = scripted_factory(script, media.clone());
    rig_from_factory(media, factory, config)
}

fn rig_from_factory(media: MockSource, factory: AcquisitionFactory, config: PlayerConfig) -> Rig {
    rig_with_device(media, factory, MockAudioDevice::new(), config)
}

fn rig_with_device(
    media: MockSource,
    factory: AcquisitionFactory,
    device: MockAudioDevice,
    config: PlayerConfig,
) -> Rig {
    let time = Arc::new(ManualTime::new());
    let renderer = RecordingRenderer::new();
    let backend = PlayerBackend {
        acquisition: factory,
        sink_factory: device.factory(),
        time: time.clone(),
    };
    let player = PlaybackManager::new(config, backend, Box::new(renderer.clone()));
    let events = player.events();
    Rig {
        player,
        time,
        media,
        device,
        renderer,
        events,
    }
}

fn rig(media: MockSource) -> Rig {
    rig_with(media, StepScript::default(), PlayerConfig::default())
}

impl Rig {
    fn run_ms(&mut self, ms: u64) {
        for _ in 0..ms / 10 {
            self.time.advance_ms(10);
            self.player.pump();
        }
    }

    fn drain_events(&self) -> Vec<PlayerEvent> {
        self.events.try_iter().collect()
    }

    /// 等待工作线程把加载结果送回
    fn settle_load(&mut self) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        for _ in 0..500 {
            self.player.pump();
            events.extend(self.drain_events());
            if self.player.loader().status() != LoadingStatus::Connecting
                && self.player.loader().status() != LoadingStatus::LoadingStreamInfo
            {
                return events;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("load never settled");
    }

    fn open_and_play(&mut self) {
        self.player.open_local("movie.mp4").unwrap();
        self.player.play().unwrap();
    }
}

#[test]
fn seek_targets_are_clamped_to_the_media_duration() {
    let mut rig = rig(MockSource::new(120.0, 25.0, true));
    rig.open_and_play();
    rig.run_ms(200);

    rig.player.seek(-5.0).unwrap();
    rig.player.pump();
    assert_eq!(rig.player.position_us(), 0);

    rig.run_ms(100);
    rig.player.seek(500.0).unwrap();
    rig.player.pump();
    assert_eq!(rig.player.position_us(), 120_000_000);

    let seeks = rig.media.log.lock().seeks.clone();
    assert_eq!(seeks.first(), Some(&(0, SeekMode::Direct)));
    assert_eq!(seeks.last(), Some(&(120_000_000, SeekMode::KeyframeBackward)));
}

#[test]
fn two_seeks_within_one_pump_execute_once_at_the_later_target() {
    let mut rig = rig(MockSource::new(120.0, 25.0, true));
    rig.open_and_play();
    rig.run_ms(100);

    rig.player.seek(20.0).unwrap();
    rig.time.advance_ms(10);
    rig.player.seek(40.0).unwrap();
    rig.run_ms(200);

    let seeks = rig.media.log.lock().seeks.clone();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].0, 40_000_000);
}

#[test]
fn seek_after_a_pump_runs_first_target_then_debounces_the_next() {
    let mut rig = rig(MockSource::new(120.0, 25.0, true));
    rig.open_and_play();
    rig.run_ms(100);

    assert_eq!(
        rig.player.seek(20.0).unwrap(),
        SeekAdmission::Scheduled(Duration::ZERO)
    );
    // 宿主循环在两次请求之间调度了一次，第一个目标已执行
    rig.run_ms(10);
    assert_eq!(rig.player.position_us(), 20_000_000);
    assert_eq!(
        rig.player.seek(40.0).unwrap(),
        SeekAdmission::Scheduled(SEEK_DEBOUNCE_DELAY)
    );
    rig.run_ms(40);
    assert_eq!(rig.media.log.lock().seeks.len(), 1);
    rig.run_ms(20);

    let targets: Vec<i64> = rig.media.log.lock().seeks.iter().map(|s| s.0).collect();
    assert_eq!(targets, vec![20_000_000, 40_000_000]);
    assert_eq!(rig.player.seek_phase(), SeekPhase::Idle);
}

#[test]
fn spaced_seeks_each_execute() {
    let mut rig = rig(MockSource::new(120.0, 25.0, true));
    rig.open_and_play();

    assert_eq!(
        rig.player.seek(5.0).unwrap(),
        SeekAdmission::Scheduled(Duration::ZERO)
    );
    rig.run_ms(30);
    assert_eq!(
        rig.player.seek(8.0).unwrap(),
        SeekAdmission::Scheduled(Duration::ZERO)
    );
    rig.run_ms(30);

    let targets: Vec<i64> = rig.media.log.lock().seeks.iter().map(|s| s.0).collect();
    assert_eq!(targets, vec![5_000_000, 8_000_000]);
    assert_eq!(rig.player.seek_phase(), SeekPhase::Idle);
}

#[test]
fn seek_clears_decoders_and_reanchors_audio() {
    let mut rig = rig(MockSource::new(120.0, 25.0, true));
    rig.open_and_play();
    rig.run_ms(200);

    rig.player.seek(10.0).unwrap();
    rig.player.pump();

    let log = rig.media.log.lock();
    assert_eq!(log.video_flushes, 1);
    assert_eq!(log.audio_flushes, 1);
    drop(log);
    assert!(rig.device.state.lock().clears >= 1);
    assert_eq!(rig.player.position_us(), 10_000_000);
    assert_eq!(rig.renderer.last(), Some(10_000_000));
}

#[test]
fn audio_clock_is_monotonic_while_playing() {
    let mut rig = rig(MockSource::new(30.0, 25.0, true));
    rig.open_and_play();

    let mut last = 0;
    for _ in 0..100 {
        rig.run_ms(10);
        let now = rig.player.audio_clock_us().unwrap();
        assert!(now >= last, "audio clock went back: {} < {}", now, last);
        last = now;
    }
    assert!(last > 0);
}

#[test]
fn seek_to_sixty_seconds_tracks_first_frame_and_audio_follows() {
    let mut rig = rig(MockSource::new(120.0, 25.0, true));
    let info = rig.player.open_local("movie.mp4").unwrap();
    assert_eq!(info.duration_us, 120_000_000);
    assert!(info.has_audio);
    rig.player.play().unwrap();
    rig.run_ms(400);

    rig.player.seek(60.0).unwrap();
    rig.player.pump();

    let first_frame = rig.renderer.last().unwrap();
    let position = rig.player.position_us();
    assert_eq!(position, first_frame);
    assert!((position - 60_000_000).abs() <= 40_000);

    // 一个调度周期内音频时钟跟上
    rig.run_ms(40);
    let audio = rig.player.audio_clock_us().unwrap();
    let video = rig.player.position_us();
    assert!((audio - 60_000_000).abs() <= 100_000, "audio clock {}", audio);
    assert!((audio - video).abs() <= 40_000, "audio {} video {}", audio, video);
}

#[test]
fn end_of_stream_resets_to_start() {
    let mut rig = rig(MockSource::new(1.0, 25.0, true));
    rig.open_and_play();
    rig.run_ms(1_200);

    assert_eq!(rig.player.playback_state(), PlaybackState::Stopped);
    assert_eq!(rig.player.position_us(), 0);
    let events = rig.drain_events();
    assert!(events.contains(&PlayerEvent::EndOfStream));
    assert_eq!(events.last(), Some(&PlayerEvent::PositionChanged(0)));
}

#[test]
fn remote_stream_becomes_ready_and_plays() {
    let mut rig = rig(MockSource::new(30.0, 25.0, true));
    rig.player
        .open_remote("rtsp://camera.local/stream", Some(5_000))
        .unwrap();
    let events = rig.settle_load();

    assert_eq!(rig.player.loader().status(), LoadingStatus::Ready);
    assert_eq!(events.first(), Some(&PlayerEvent::LoadingStarted));
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::StreamReady {
            duration_us: 30_000_000,
            has_audio: true,
            ..
        }
    )));

    rig.player.play().unwrap();
    rig.run_ms(200);
    assert_eq!(rig.renderer.count(), 5);
}

#[test]
fn cancelling_while_connecting_reports_cancelled_not_failed() {
    let script = StepScript {
        block_stream_info: true,
        ..StepScript::default()
    };
    let mut rig = rig_with(MockSource::new(30.0, 25.0, true), script, PlayerConfig::default());
    rig.player
        .open_remote("http://example.com/live.m3u8", None)
        .unwrap();
    assert_eq!(rig.player.loader().status(), LoadingStatus::Connecting);

    rig.player.cancel_load();
    thread::sleep(Duration::from_millis(30));
    rig.run_ms(100);

    let events = rig.drain_events();
    assert!(events.contains(&PlayerEvent::LoadingCancelled));
    assert!(!events.iter().any(|e| matches!(e, PlayerEvent::LoadingFailed(_))));
    assert_eq!(rig.player.loader().status(), LoadingStatus::Cancelled);
}

#[test]
fn stream_info_that_never_finishes_times_out_from_connecting() {
    let script = StepScript {
        block_stream_info: true,
        ..StepScript::default()
    };
    let mut rig = rig_with(MockSource::new(30.0, 25.0, true), script, PlayerConfig::default());
    rig.player
        .open_remote("http://example.com/slow.m3u8", Some(1_000))
        .unwrap();

    rig.run_ms(990);
    assert_eq!(rig.player.loader().status(), LoadingStatus::Connecting);
    rig.run_ms(20);
    assert_eq!(rig.player.loader().status(), LoadingStatus::Timeout);

    // 工作线程随后的结果被丢弃
    thread::sleep(Duration::from_millis(30));
    rig.run_ms(100);

    let events = rig.drain_events();
    assert!(events.contains(&PlayerEvent::LoadingFailed("连接超时".to_string())));
    assert!(!events.iter().any(|e| matches!(e, PlayerEvent::StreamReady { .. })));
    let history = rig.player.loader().session().unwrap().history().to_vec();
    assert_eq!(
        history,
        vec![LoadingStatus::Idle, LoadingStatus::Connecting, LoadingStatus::Timeout]
    );
    assert_eq!(rig.player.playback_state(), PlaybackState::Idle);
}

#[test]
fn failed_remote_load_keeps_current_session_playing() {
    // 本地文件正常，网络流没有视频流
    let media = MockSource::new(30.0, 25.0, true);
    let shared = media.clone();
    let factory: AcquisitionFactory = Arc::new(move |location: &SourceLocation, _config: Arc<NetworkConfig>, cancel: Arc<AtomicBool>| {
        let script = StepScript {
            no_video: location.is_network_stream(),
            ..StepScript::default()
        };
        Box::new(
            ScriptedSteps::new(script, shared.clone())
                .with_cancel(cancel)
                .with_location(location),
        ) as Box<dyn AcquisitionSteps>
    });
    let mut rig = rig_from_factory(media, factory, PlayerConfig::default());
    rig.open_and_play();
    rig.run_ms(200);

    rig.player
        .open_remote("http://example.com/audio-only.aac", None)
        .unwrap();
    let events = rig.settle_load();
    assert!(events.iter().any(|e| matches!(e, PlayerEvent::LoadingFailed(_))));

    let frames = rig.renderer.count();
    rig.run_ms(80);
    assert!(rig.player.is_playing());
    assert_eq!(rig.renderer.count(), frames + 2);
}

#[test]
fn loading_progress_is_reported() {
    let script = StepScript {
        block_stream_info: true,
        ..StepScript::default()
    };
    let mut rig = rig_with(MockSource::new(30.0, 25.0, true), script, PlayerConfig::default());
    rig.player
        .open_remote("http://example.com/live.m3u8", Some(10_000))
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    rig.run_ms(4_000);

    let percents: Vec<u8> = rig
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            PlayerEvent::LoadingProgress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents[..2], [10, 40]);
    // 时间估算只在超过已报告进度时上报，且不超过 90
    assert!(percents.len() > 2);
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert!(percents.iter().all(|p| *p <= 90));
    rig.player.cancel_load();
}

#[test]
fn stop_and_reopen_always_succeed_after_errors() {
    let mut media = MockSource::new(10.0, 25.0, true);
    media.fail_seek = true;
    let mut rig = rig(media);
    rig.open_and_play();
    rig.player.seek(5.0).unwrap();
    rig.player.pump();

    rig.device.state.lock().fail_writes = 10;
    rig.run_ms(400);

    rig.player.stop();
    assert_eq!(rig.player.playback_state(), PlaybackState::Stopped);
    rig.player.close();
    assert_eq!(rig.player.playback_state(), PlaybackState::Idle);

    rig.player.open_local("movie.mp4").unwrap();
    rig.player.play().unwrap();
    rig.run_ms(80);
    assert!(rig.player.is_playing());
}

#[test]
fn rejecting_seeks_during_stabilization_is_opt_in() {
    let config = PlayerConfig {
        reject_seek_while_unstable: true,
        ..PlayerConfig::default()
    };
    let mut rig = rig_with(MockSource::new(60.0, 25.0, false), StepScript::default(), config);
    rig.open_and_play();
    rig.run_ms(80);
    assert_eq!(rig.player.seek(10.0).unwrap(), SeekAdmission::RejectedUnstable);

    rig.run_ms(200);
    assert!(matches!(
        rig.player.seek(10.0).unwrap(),
        SeekAdmission::Scheduled(_)
    ));
}

#[test]
fn seek_on_stream_without_pts_lands_on_the_target() {
    let mut media = MockSource::new(180.0, 25.0, false);
    media.missing_pts = true;
    let mut rig = rig(media);
    rig.open_and_play();
    rig.run_ms(200);

    rig.player.seek(120.0).unwrap();
    rig.player.pump();
    assert_eq!(rig.renderer.last(), Some(120_000_000));
    assert_eq!(rig.player.position_us(), 120_000_000);

    // 后续帧按帧间隔外推
    rig.run_ms(40);
    assert_eq!(rig.player.position_us(), 120_040_000);
}

#[test]
fn device_rejecting_source_rate_falls_back_to_44100() {
    let mut media = MockSource::new(30.0, 25.0, true);
    media.sample_rate = 22_050;
    let device = MockAudioDevice {
        supported_rate: Some(48_000),
        ..MockAudioDevice::new()
    };
    let factory = scripted_factory(StepScript::default(), media.clone());
    let mut rig = rig_with_device(media, factory, device, PlayerConfig::default());

    let info = rig.player.open_local("movie.mp4").unwrap();
    assert!(info.has_audio);
    assert_eq!(rig.device.state.lock().last_format, Some((44_100, 2)));

    rig.player.play().unwrap();
    rig.run_ms(400);
    assert!(rig.device.state.lock().written_samples > 0);
    let audio = rig.player.audio_clock_us().unwrap();
    let video = rig.player.position_us();
    assert!((audio - video).abs() <= 40_000, "audio {} video {}", audio, video);
}

#[test]
fn audio_decoder_failure_degrades_to_video_only() {
    let script = StepScript {
        fail_audio_decoder: true,
        ..StepScript::default()
    };
    let mut rig = rig_with(MockSource::new(30.0, 25.0, true), script, PlayerConfig::default());
    rig.player
        .open_remote("http://example.com/movie.m3u8", None)
        .unwrap();
    let events = rig.settle_load();

    assert_eq!(rig.player.loader().status(), LoadingStatus::Ready);
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::StreamReady {
            has_audio: false,
            ..
        }
    )));
    assert_eq!(rig.device.state.lock().created, 0);

    rig.player.play().unwrap();
    rig.run_ms(200);
    assert_eq!(rig.renderer.count(), 5);
    assert_eq!(rig.player.audio_clock_us(), None);
    assert!(rig.player.is_playing());
}

#[test]
fn timeout_during_a_slow_step_drops_the_late_result() {
    let script = StepScript {
        step_delay: Duration::from_millis(100),
        ..StepScript::default()
    };
    let mut rig = rig_with(MockSource::new(30.0, 25.0, true), script, PlayerConfig::default());
    rig.player
        .open_remote("http://example.com/slow.m3u8", Some(30))
        .unwrap();

    // 超时在打开输入这一步还没返回时到期
    rig.run_ms(40);
    assert_eq!(rig.player.loader().status(), LoadingStatus::Timeout);

    // 工作线程结束当前步骤后的结果被丢弃
    thread::sleep(Duration::from_millis(300));
    rig.run_ms(50);

    let events = rig.drain_events();
    assert!(events.contains(&PlayerEvent::LoadingFailed("连接超时".to_string())));
    assert!(!events.contains(&PlayerEvent::LoadingCancelled));
    assert!(!events.iter().any(|e| matches!(e, PlayerEvent::StreamReady { .. })));
    assert_eq!(
        rig.player.loader().session().unwrap().history(),
        &[LoadingStatus::Idle, LoadingStatus::Connecting, LoadingStatus::Timeout]
    );
    assert_eq!(rig.player.playback_state(), PlaybackState::Idle);
}
