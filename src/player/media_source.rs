use crate::core::{MediaInfo, SourceKind};
use crate::player::demuxer_source::{AudioDecode, DemuxerSource, VideoDecode};

/// 已打开的媒体源
///
/// 加载成功后整体移交给播放引擎独占，关闭 / 重新打开 / 失败时销毁。
pub struct MediaSource {
    pub demuxer: Box<dyn DemuxerSource>,
    pub video_decoder: Box<dyn VideoDecode>,
    /// 音频解码器打开失败时为 None（降级为纯视频）
    pub audio_decoder: Option<Box<dyn AudioDecode>>,
    pub info: MediaInfo,
    pub kind: SourceKind,
    pub location: String,
}

impl MediaSource {
    pub fn has_audio(&self) -> bool {
        self.audio_decoder.is_some()
    }

    /// 解码调度间隔：max(8ms, 1000/fps)
    pub fn frame_interval_ms(&self) -> u64 {
        frame_interval_ms(self.info.fps)
    }
}

pub fn frame_interval_ms(fps: f64) -> u64 {
    if fps.is_finite() && fps > 0.0 {
        ((1000.0 / fps) as u64).max(8)
    } else {
        40
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("location", &self.location)
            .field("kind", &self.kind)
            .field("info", &self.info)
            .field("has_audio", &self.has_audio())
            .finish()
    }
}
