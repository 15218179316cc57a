use crate::core::{AudioFrame, PixelFormat, PlayerError, Result, VideoFrame};
use crate::player::demuxer_source::{AudioDecode, VideoDecode};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, format, software, util};
use log::{debug, info, warn};
use std::os::raw::c_int;

/// 时间基（秒/刻度）下的时间戳换算为微秒
pub fn ticks_to_us(ticks: i64, time_base: f64) -> i64 {
    (ticks as f64 * time_base * 1_000_000.0).round() as i64
}

fn rational_to_f64(r: util::rational::Rational) -> Option<f64> {
    if r.numerator() > 0 && r.denominator() > 0 {
        Some(r.numerator() as f64 / r.denominator() as f64)
    } else {
        None
    }
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno: 11 }) // EAGAIN
}

/// 视频解码器（软件解码，输出原始平面数据）
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    time_base: f64,
}

impl VideoDecoder {
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let params = stream.parameters();
        let codec_name = params.id().name().to_string();
        let decoder = codec::context::Context::from_parameters(params)?
            .decoder()
            .video()
            .map_err(|e| PlayerError::DecoderNotFound(format!("{} ({})", codec_name, e)))?;

        let time_base = rational_to_f64(stream.time_base()).unwrap_or(1.0 / 90_000.0);

        info!(
            "创建视频解码器: {} {}x{}, 格式: {:?}",
            codec_name,
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self { decoder, time_base })
    }

    fn receive_all(&mut self, frames: &mut Vec<VideoFrame>) {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => frames.push(self.copy_frame(&decoded)),
                Err(ffmpeg::Error::Eof) => break,
                Err(e) if is_again(&e) => break,
                Err(e) => {
                    warn!("视频解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
    }

    /// 拷贝原始平面（不做颜色转换）
    fn copy_frame(&self, frame: &util::frame::Video) -> VideoFrame {
        let format = match frame.format() {
            util::format::Pixel::YUV420P => PixelFormat::YUV420P,
            util::format::Pixel::NV12 => PixelFormat::NV12,
            util::format::Pixel::RGBA => PixelFormat::RGBA,
            util::format::Pixel::RGB24 => PixelFormat::RGB24,
            _ => PixelFormat::Other,
        };

        let planes = (0..frame.planes()).map(|i| frame.data(i).to_vec()).collect();
        let strides = (0..frame.planes()).map(|i| frame.stride(i)).collect();

        VideoFrame {
            pts_us: frame.timestamp().map(|ts| ticks_to_us(ts, self.time_base)),
            width: frame.width(),
            height: frame.height(),
            format,
            planes,
            strides,
        }
    }
}

impl VideoDecode for VideoDecoder {
    fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器已收到 EOF，重置后忽略本次包");
                self.decoder.flush();
                return Ok(frames);
            }
            Err(e) => return Err(PlayerError::DecodeError(format!("视频包: {}", e))),
        }

        self.receive_all(&mut frames);
        Ok(frames)
    }

    fn drain(&mut self) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();
        self.decoder.send_eof()?;
        self.receive_all(&mut frames);
        // 允许 Seek 回去后继续使用
        self.decoder.flush();
        Ok(frames)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// 音频解码器：解码后重采样为交错 S16（单声道或立体声）
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<Resampler>,
    time_base: Option<f64>,
    target_sample_rate: u32,
    target_channels: u16,
}

/// S16 交错输出的重采样器，源格式（格式、声道布局位、采样率）变化时由调用方重建
struct Resampler {
    context: software::resampling::Context,
    source: (util::format::Sample, u64, u32),
    layout: util::channel_layout::ChannelLayout,
    channels: u16,
}

impl Resampler {
    const OUTPUT_FORMAT: util::format::Sample =
        util::format::Sample::I16(util::format::sample::Type::Packed);

    fn source_of(frame: &util::frame::Audio) -> (util::format::Sample, util::channel_layout::ChannelLayout, u32) {
        let layout = if frame.channel_layout().is_empty() {
            util::channel_layout::ChannelLayout::default(frame.channels() as i32)
        } else {
            frame.channel_layout()
        };
        (frame.format(), layout, frame.rate())
    }

    fn new(frame: &util::frame::Audio, target_rate: u32, target_channels: u16) -> Result<Self> {
        let (format, source_layout, source_rate) = Self::source_of(frame);
        let (layout, channels) = if target_channels == 1 {
            (util::channel_layout::ChannelLayout::MONO, 1)
        } else {
            (util::channel_layout::ChannelLayout::STEREO, 2)
        };
        debug!(
            "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch S16",
            source_rate,
            frame.channels(),
            target_rate,
            channels
        );
        let context = software::resampling::Context::get(
            format,
            source_layout,
            source_rate,
            Self::OUTPUT_FORMAT,
            layout,
            target_rate,
        )?;
        Ok(Self {
            context,
            source: (format, source_layout.bits(), source_rate),
            layout,
            channels,
        })
    }

    fn matches(&self, frame: &util::frame::Audio) -> bool {
        let (format, layout, rate) = Self::source_of(frame);
        self.source == (format, layout.bits(), rate)
    }

    /// 转换一帧
    ///
    /// 输出帧按 `swr_get_out_samples` 预分配，升采样时一次取完，重采样器内部不积压。
    fn convert(&mut self, frame: &util::frame::Audio) -> Result<Vec<i16>> {
        let expected = unsafe {
            ffi::swr_get_out_samples(self.context.as_mut_ptr(), frame.samples() as c_int)
        };
        let capacity = usize::try_from(expected).unwrap_or(0).max(frame.samples());
        let mut resampled = util::frame::Audio::new(Self::OUTPUT_FORMAT, capacity, self.layout);
        self.context.run(frame, &mut resampled)?;

        let count = resampled.samples() * self.channels as usize;
        let Some(bytes) = resampled.data(0).get(..count * 2) else {
            return Ok(Vec::new());
        };
        Ok(bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect())
    }
}

// SwrContext 本身不是 Send，解码器只在持有它的线程内使用
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let params = stream.parameters();
        let codec_name = params.id().name().to_string();
        let decoder = codec::context::Context::from_parameters(params)?
            .decoder()
            .audio()
            .map_err(|e| PlayerError::DecoderNotFound(format!("{} ({})", codec_name, e)))?;

        let target_channels = decoder.channels().clamp(1, 2);
        let target_sample_rate = decoder.rate();

        debug!(
            "音频解码器: {} {} Hz, {} 声道, 格式: {:?}",
            codec_name,
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            resampler: None,
            time_base: rational_to_f64(stream.time_base()),
            target_sample_rate,
            target_channels,
        })
    }

    fn resample(&mut self, frame: &util::frame::Audio) -> Result<Option<AudioFrame>> {
        // 源格式变化时重建重采样器
        let resampler = match self.resampler.take() {
            Some(r) if r.matches(frame) => self.resampler.insert(r),
            _ => self.resampler.insert(Resampler::new(
                frame,
                self.target_sample_rate,
                self.target_channels,
            )?),
        };

        let samples = resampler.convert(frame)?;
        if samples.is_empty() {
            return Ok(None);
        }

        Ok(Some(AudioFrame {
            pts: frame.timestamp(),
            sample_rate: self.target_sample_rate,
            channels: resampler.channels,
            samples,
        }))
    }
}

impl AudioDecode for AudioDecoder {
    fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                self.decoder.flush();
                return Ok(frames);
            }
            Err(e) => return Err(PlayerError::DecodeError(format!("音频包: {}", e))),
        }

        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    if let Some(frame) = self.resample(&decoded)? {
                        frames.push(frame);
                    }
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) if is_again(&e) => break,
                Err(e) => return Err(PlayerError::DecodeError(format!("音频帧: {}", e))),
            }
        }

        Ok(frames)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn set_output_format(&mut self, sample_rate: u32, channels: u16) {
        let channels = channels.clamp(1, 2);
        if (sample_rate, channels) != (self.target_sample_rate, self.target_channels) {
            self.target_sample_rate = sample_rate;
            self.target_channels = channels;
            self.resampler = None;
        }
    }

    fn source_format(&self) -> (u32, u16) {
        (self.decoder.rate(), self.decoder.channels())
    }

    fn time_base(&self) -> Option<f64> {
        self.time_base
    }
}
