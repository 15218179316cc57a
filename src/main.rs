use anyhow::{anyhow, Result};
use clap::Parser;
use log::{info, warn};
use myy_sync_player::core::SourceLocation;
use myy_sync_player::renderer::StatsRenderer;
use myy_sync_player::{NetworkConfig, PlaybackManager, PlayerBackend, PlayerConfig, PlayerEvent};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "myy_sync_player")]
#[command(author, version, about = "播放同步引擎命令行：打开本地文件或网络流并无界面播放")]
struct Cli {
    /// 本地文件路径或网络流 URL
    input: Option<String>,

    /// 网络流加载超时（毫秒）
    #[arg(long, default_value_t = 15_000)]
    timeout_ms: u64,

    /// 网络参数，格式 key=value;key=value
    #[arg(long)]
    network_config: Option<String>,

    /// 音量 0.0 - 1.0
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// 就绪后跳转到的位置（秒）
    #[arg(long)]
    seek_to: Option<f64>,

    /// 最长播放时长（秒），不指定则播放到结束
    #[arg(long)]
    play_seconds: Option<f64>,

    /// 结束时以 JSON 输出播放器状态
    #[arg(long)]
    status_json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("cpal", log::LevelFilter::Warn)
        .init();

    let cli = Cli::parse();
    info!("🎬 MYY Sync Player 启动");

    let network = match &cli.network_config {
        Some(record) => record.parse::<NetworkConfig>()?,
        None => NetworkConfig::default(),
    };
    let config = PlayerConfig {
        network,
        remote_timeout_ms: cli.timeout_ms,
        volume: cli.volume,
        ..PlayerConfig::default()
    };

    let backend = PlayerBackend::ffmpeg()?;
    let mut player = PlaybackManager::new(config, backend, Box::new(StatsRenderer::new()));
    let events = player.events();

    let Some(input) = cli.input.as_deref() else {
        info!("未指定媒体源，退出");
        return print_status(&player, cli.status_json);
    };

    if SourceLocation::parse(input).is_network_stream() {
        player.open_remote(input, Some(cli.timeout_ms))?;
    } else {
        player.open_local(input)?;
    }

    let mut play_deadline = None;
    let mut finished = false;
    while !finished {
        player.pump();

        for event in events.try_iter() {
            match event {
                PlayerEvent::StreamReady { duration_us, .. } => {
                    info!("▶️ 开始播放（时长 {:.1}s）", duration_us as f64 / 1_000_000.0);
                    player.play()?;
                    if let Some(seconds) = cli.seek_to {
                        player.seek(seconds)?;
                    }
                    play_deadline = cli
                        .play_seconds
                        .map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
                }
                PlayerEvent::LoadingProgress { percent, message } => {
                    info!("⏳ {}% {}", percent, message);
                }
                PlayerEvent::LoadingFailed(reason) => {
                    return Err(anyhow!("加载失败: {}", reason));
                }
                PlayerEvent::LoadingCancelled => finished = true,
                PlayerEvent::AudioError(message) => warn!("🔇 {}", message),
                PlayerEvent::EndOfStream => finished = true,
                _ => {}
            }
        }

        if play_deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            info!("已达到播放时长上限");
            finished = true;
        }

        let wait = player
            .next_deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(10))
            .clamp(Duration::from_millis(1), Duration::from_millis(10));
        thread::sleep(wait);
    }

    if let Some(status) = player.audio_status() {
        info!("{}", status);
    }
    let result = print_status(&player, cli.status_json);
    player.close();
    result
}

fn print_status(player: &PlaybackManager, as_json: bool) -> Result<()> {
    let state = player.state();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        info!(
            "状态: {:?}, 位置 {:.2}s / {:.2}s",
            state.state,
            state.position_us as f64 / 1_000_000.0,
            state.duration_us as f64 / 1_000_000.0
        );
    }
    Ok(())
}
