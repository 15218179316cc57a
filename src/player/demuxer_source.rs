use crate::core::{AudioFrame, MediaInfo, Result, VideoFrame};
use ffmpeg_next as ffmpeg;
use ffmpeg::Packet;

/// Packet 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Video,
    Audio,
}

/// 媒体包
pub struct MediaPacket {
    pub packet: Packet,
    pub packet_type: PacketType,
    pub stream_index: usize,
}

impl MediaPacket {
    pub fn is_video(&self) -> bool {
        self.packet_type == PacketType::Video
    }
}

/// Seek 策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// 直接定位到目标时间（不对齐关键帧）
    Direct,
    /// 向后对齐到最近的关键帧
    KeyframeBackward,
}

/// Demuxer 数据源抽象接口
///
/// 只产出已选中的视频流 / 音频流的包，其他流在内部跳过。
pub trait DemuxerSource: Send {
    /// 读取下一个媒体包
    ///
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// Seek 到指定位置（微秒）
    fn seek(&mut self, target_us: i64, mode: SeekMode) -> Result<()>;

    fn media_info(&self) -> &MediaInfo;

    fn video_stream_index(&self) -> usize;

    fn audio_stream_index(&self) -> Option<usize>;

    /// 描述信息（用于日志）
    fn description(&self) -> String;
}

/// 视频解码接口
pub trait VideoDecode: Send {
    /// 送入一个包，返回解出的 0~n 帧
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>>;

    /// 流结束时排空解码器内部缓冲的帧
    fn drain(&mut self) -> Result<Vec<VideoFrame>>;

    /// 丢弃内部缓冲（Seek 后调用）
    fn flush(&mut self);
}

/// 音频解码接口：输出交错 S16，格式由 [`AudioDecode::set_output_format`] 指定
pub trait AudioDecode: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>>;

    fn flush(&mut self);

    fn set_output_format(&mut self, sample_rate: u32, channels: u16);

    /// 源采样率与声道数
    fn source_format(&self) -> (u32, u16);

    /// 音频流时间基（秒/刻度），流没有提供时为 None
    fn time_base(&self) -> Option<f64>;
}
