use crate::core::{MediaInfo, PlayerError, Result};
use crate::player::demuxer_source::{DemuxerSource, MediaPacket, PacketType, SeekMode};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, format, media};
use log::{debug, info, warn};
use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 帧率缺失时的回退值
const FALLBACK_FPS: f64 = 25.0;

/// AVIO 中断回调：取消标志置位后，阻塞中的读写立即返回
unsafe extern "C" fn interrupt_callback(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    let flag = &*(opaque as *const AtomicBool);
    flag.load(Ordering::Relaxed) as c_int
}

/// 已打开但尚未探测的输入
///
/// 持有取消标志的引用，保证中断回调的 opaque 指针在输入存活期间有效。
pub struct OpenedInput {
    input: format::context::Input,
    _cancel: Option<Arc<AtomicBool>>,
}

// 仅在单一线程内使用，加载线程完成后整体移交给播放线程
unsafe impl Send for OpenedInput {}

impl OpenedInput {
    /// 打开输入（分配上下文、绑定中断回调、应用选项）
    pub fn open(
        location: &str,
        options: &[(String, String)],
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Self> {
        info!("正在打开: {}", location);

        let path = CString::new(location)
            .map_err(|_| PlayerError::InvalidUrl(location.to_string()))?;

        let mut dict = ffmpeg::Dictionary::new();
        for (key, value) in options {
            dict.set(key, value);
        }

        unsafe {
            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(PlayerError::OpenError("无法分配解封装上下文".to_string()));
            }

            if let Some(flag) = &cancel {
                (*ctx).interrupt_callback = ffi::AVIOInterruptCB {
                    callback: Some(interrupt_callback),
                    opaque: Arc::as_ptr(flag) as *mut c_void,
                };
            }

            let mut opts = dict.disown();
            let ret = ffi::avformat_open_input(&mut ctx, path.as_ptr(), ptr::null_mut(), &mut opts);
            // 释放未被消费的选项
            let leftover = ffmpeg::Dictionary::own(opts);
            for (key, _) in leftover.iter() {
                debug!("未使用的选项: {}", key);
            }

            if ret < 0 {
                // 失败时 avformat_open_input 已释放上下文
                return Err(PlayerError::OpenError(format!(
                    "无法打开 {}: {}",
                    location,
                    ffmpeg::Error::from(ret)
                )));
            }

            Ok(Self {
                input: format::context::Input::wrap(ctx),
                _cancel: cancel,
            })
        }
    }

    /// 探测流信息
    pub fn find_stream_info(&mut self) -> Result<()> {
        let ret = unsafe { ffi::avformat_find_stream_info(self.input.as_mut_ptr(), ptr::null_mut()) };
        if ret < 0 {
            return Err(PlayerError::OpenError(format!(
                "无法获取流信息: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        debug!("探测完成，共 {} 路流", self.input.nb_streams());
        Ok(())
    }

    /// 按流顺序选择第一路视频流与第一路音频流（视频流必需）
    pub fn select_streams(&self) -> Result<(usize, Option<usize>)> {
        let first_of = |kind: media::Type| {
            self.input
                .streams()
                .find(|s| s.parameters().medium() == kind)
                .map(|s| s.index())
        };

        let video = first_of(media::Type::Video).ok_or(PlayerError::NoVideoStream)?;
        let audio = first_of(media::Type::Audio);
        debug!("视频流索引: {}, 音频流索引: {:?}", video, audio);
        Ok((video, audio))
    }

    pub fn input(&self) -> &format::context::Input {
        &self.input
    }
}

/// 解封装器 - 读取媒体源并分离音视频流
pub struct Demuxer {
    opened: OpenedInput,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    media_info: MediaInfo,
    source_path: String,
}

impl Demuxer {
    /// 由已探测的输入构建解封装器
    pub fn new(
        opened: OpenedInput,
        video_stream_index: usize,
        audio_stream_index: Option<usize>,
        source_path: &str,
    ) -> Result<Self> {
        let media_info = Self::extract_media_info(&opened.input, video_stream_index, audio_stream_index)?;
        info!(
            "📺 媒体信息: {}x{} @ {:.2}fps, 时长 {:.1}s, 视频 {}, 音频 {}",
            media_info.width,
            media_info.height,
            media_info.fps,
            media_info.duration_seconds(),
            media_info.video_codec,
            media_info.audio_codec
        );

        Ok(Self {
            opened,
            video_stream_index,
            audio_stream_index,
            media_info,
            source_path: source_path.to_string(),
        })
    }

    fn extract_media_info(
        input: &format::context::Input,
        video_index: usize,
        audio_index: Option<usize>,
    ) -> Result<MediaInfo> {
        let video_stream = input.stream(video_index).ok_or(PlayerError::NoVideoStream)?;
        let video_params = video_stream.parameters();
        let video_codec = video_params.id().name().to_string();
        let video = codec::context::Context::from_parameters(video_params)?
            .decoder()
            .video()?;

        let fps = [video_stream.avg_frame_rate(), video_stream.rate()]
            .into_iter()
            .find(|r| r.numerator() > 0 && r.denominator() > 0)
            .map(|r| r.numerator() as f64 / r.denominator() as f64)
            .unwrap_or_else(|| {
                warn!("视频流没有有效帧率，按 {} fps 处理", FALLBACK_FPS);
                FALLBACK_FPS
            });

        // AV_NOPTS_VALUE（直播流）按 0 处理
        let duration_us = input.duration().max(0);

        let mut info = MediaInfo {
            duration_us,
            width: video.width(),
            height: video.height(),
            fps,
            video_codec,
            audio_codec: "none".to_string(),
            has_audio: audio_index.is_some(),
            ..MediaInfo::default()
        };

        if let Some(stream) = audio_index.and_then(|idx| input.stream(idx)) {
            let params = stream.parameters();
            info.audio_codec = params.id().name().to_string();
            if let Ok(audio) = codec::context::Context::from_parameters(params)
                .and_then(|ctx| ctx.decoder().audio())
            {
                info.sample_rate = audio.rate();
                info.channels = audio.channels();
            }
        }

        Ok(info)
    }
}

impl DemuxerSource for Demuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let input = &mut self.opened.input;
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(input) {
                Ok(()) => {
                    let stream_index = packet.stream();
                    let packet_type = if stream_index == self.video_stream_index {
                        PacketType::Video
                    } else if Some(stream_index) == self.audio_stream_index {
                        PacketType::Audio
                    } else {
                        continue;
                    };
                    return Ok(Some(MediaPacket {
                        packet,
                        packet_type,
                        stream_index,
                    }));
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(PlayerError::DecodeError(format!("读取数据包失败: {}", e))),
            }
        }
    }

    fn seek(&mut self, target_us: i64, mode: SeekMode) -> Result<()> {
        let flags = match mode {
            SeekMode::Direct => 0,
            SeekMode::KeyframeBackward => ffi::AVSEEK_FLAG_BACKWARD as c_int,
        };
        // stream_index = -1：时间戳以 AV_TIME_BASE（微秒）为单位
        let ret = unsafe { ffi::av_seek_frame(self.opened.input.as_mut_ptr(), -1, target_us, flags) };
        if ret < 0 {
            return Err(PlayerError::SeekError(format!(
                "{}us ({:?}): {}",
                target_us,
                mode,
                ffmpeg::Error::from(ret)
            )));
        }
        Ok(())
    }

    fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn video_stream_index(&self) -> usize {
        self.video_stream_index
    }

    fn audio_stream_index(&self) -> Option<usize> {
        self.audio_stream_index
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
