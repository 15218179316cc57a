use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开媒体源: {0}")]
    OpenError(String),

    #[error("未找到视频流")]
    NoVideoStream,

    #[error("未找到解码器: {0}")]
    DecoderNotFound(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("没有已打开的媒体源")]
    NotLoaded,
}

pub type Result<T> = std::result::Result<T, PlayerError>;
