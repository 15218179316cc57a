use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 媒体源位置（打开之前）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },
}

impl SourceLocation {
    /// 解析命令行/界面传入的路径或 URL
    ///
    /// 可识别协议前缀的一律当作网络流，其余当作本地文件。
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        match StreamProtocol::detect(input) {
            Some(protocol) => SourceLocation::NetworkStream {
                url: input.to_string(),
                protocol,
            },
            None => SourceLocation::LocalFile(PathBuf::from(input)),
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, SourceLocation::NetworkStream { .. })
    }

    pub fn kind(&self) -> SourceKind {
        if self.is_network_stream() {
            SourceKind::NetworkStream
        } else {
            SourceKind::LocalFile
        }
    }

    /// 用于日志和打开的字符串形式
    pub fn as_display(&self) -> String {
        match self {
            SourceLocation::LocalFile(path) => path.to_string_lossy().to_string(),
            SourceLocation::NetworkStream { url, .. } => url.clone(),
        }
    }
}

/// 媒体源类别（决定同步参数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    LocalFile,
    NetworkStream,
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamProtocol {
    /// HTTP / HTTPS（含 HLS）
    Http,
    /// RTMP - 实时消息协议（直播流）
    Rtmp,
    /// RTSP - 实时流协议（监控摄像头）
    Rtsp,
    Udp,
    Tcp,
}

impl StreamProtocol {
    /// 根据 URL scheme 检测协议（大小写不敏感）
    pub fn detect(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once("://")?;
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(StreamProtocol::Http),
            "rtmp" | "rtmps" => Some(StreamProtocol::Rtmp),
            "rtsp" | "rtsps" => Some(StreamProtocol::Rtsp),
            "udp" => Some(StreamProtocol::Udp),
            "tcp" => Some(StreamProtocol::Tcp),
            _ => None,
        }
    }

    /// scheme 是否为加密变体（https / rtmps / rtsps）
    pub fn is_secure_scheme(url: &str) -> bool {
        url.split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase().ends_with('s'))
            .unwrap_or(false)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::Http => "HTTP",
            StreamProtocol::Rtmp => "RTMP",
            StreamProtocol::Rtsp => "RTSP",
            StreamProtocol::Udp => "UDP",
            StreamProtocol::Tcp => "TCP",
        }
    }
}

/// 像素格式（解码器原样输出，颜色转换由渲染端负责）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    YUV420P,
    NV12,
    RGBA,
    RGB24,
    Other,
}

/// 视频帧数据（原始平面数据，不做颜色转换）
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts_us: Option<i64>, // 显示时间戳（微秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Vec<u8>>,
    pub strides: Vec<usize>,
}

/// 音频帧数据：交错 16-bit 有符号，已重采样到设备格式
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: Option<i64>, // 流时间基下的 PTS
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// 每声道采样数
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Opening,
    Playing,
    Paused,
    Seeking,
    Stopped,
    Error,
}

/// 媒体信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_us: i64, // 总时长（微秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub has_audio: bool,
}

impl MediaInfo {
    pub fn duration_seconds(&self) -> f64 {
        self.duration_us.max(0) as f64 / 1_000_000.0
    }
}

/// 播放器状态信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub state: PlaybackState,
    pub position_us: i64,
    pub duration_us: i64,
    pub volume: f32, // 音量 0.0 - 1.0
    pub media_info: Option<MediaInfo>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            position_us: 0,
            duration_us: 0,
            volume: 1.0,
            media_info: None,
        }
    }
}

/// 引擎对外发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    LoadingStarted,
    LoadingProgress { percent: u8, message: String },
    StreamReady {
        duration_us: i64,
        fps: f64,
        width: u32,
        height: u32,
        has_audio: bool,
    },
    LoadingFailed(String),
    LoadingCancelled,
    PositionChanged(i64),
    BufferStatus { level: u32, max: u32 },
    AudioError(String),
    EndOfStream,
}
