use crate::core::{PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 设备不接受源采样率时的回退采样率
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// 音频输出设备接口（交错 S16）
pub trait AudioSink: Send {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn start(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    fn stop(&mut self);
    /// 写入采样，返回实际接受的采样数
    fn write(&mut self, samples: &[i16]) -> Result<usize>;
    /// 设备端尚未播放的字节数
    fn buffered_bytes(&self) -> usize;
    fn clear(&mut self);
    fn set_volume(&mut self, volume: f32);
    /// 设备正在消费数据（非空闲）
    fn is_active(&self) -> bool;
}

/// 按（采样率，声道数）创建输出设备
pub type SinkFactory = Arc<dyn Fn(u32, u16) -> Result<Box<dyn AudioSink>> + Send + Sync>;

/// 基于 cpal 的默认设备输出
pub fn cpal_sink_factory() -> SinkFactory {
    Arc::new(|sample_rate, channels| {
        let sink = AudioOutput::new(sample_rate, channels)?;
        Ok(Box::new(sink) as Box<dyn AudioSink>)
    })
}

/// 音频输出 - 使用 cpal 播放音频
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<i16>>,
    volume: Arc<Mutex<f32>>,
    /// 回调线程上报的设备错误
    failed: Arc<AtomicBool>,
    /// 缓冲上限（采样数），写入超出部分被拒绝
    capacity: usize,
    paused: bool,
}

// cpal::Stream 本身不是 Send，但它只在持有 AudioOutput 的线程中创建和使用
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 创建音频输出：优先使用源采样率，不支持时回退到 44.1kHz
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.clamp(1, 2);
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let candidates = [
            (sample_rate, channels),
            (FALLBACK_SAMPLE_RATE, channels),
            (FALLBACK_SAMPLE_RATE, 2),
            (FALLBACK_SAMPLE_RATE, 1),
        ];

        let (rate, ch) = candidates
            .into_iter()
            .find(|&(rate, ch)| supported.iter().any(|s| Self::is_config_compatible(rate, ch, s)))
            .ok_or_else(|| {
                PlayerError::AudioError(format!(
                    "音频设备不支持 {} Hz / {} Hz ({} 声道)",
                    sample_rate, FALLBACK_SAMPLE_RATE, channels
                ))
            })?;

        if (rate, ch) != (sample_rate, channels) {
            warn!("⚠️ 音频设备不支持 {} Hz, {} 声道，回退到 {} Hz, {} 声道", sample_rate, channels, rate, ch);
        }

        let config = StreamConfig {
            channels: ch,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            volume: Arc::new(Mutex::new(1.0)),
            failed: Arc::new(AtomicBool::new(false)),
            // 最多缓冲约 1 秒
            capacity: rate as usize * ch as usize,
            paused: false,
        })
    }

    fn is_config_compatible(rate: u32, channels: u16, supported: &SupportedStreamConfigRange) -> bool {
        rate >= supported.min_sample_rate().0
            && rate <= supported.max_sample_rate().0
            && channels == supported.channels()
    }

    fn build_stream(&self) -> Result<Stream> {
        let buffer = self.buffer.clone();
        let volume = self.volume.clone();
        let failed = self.failed.clone();

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock();
                    for sample in data.iter_mut() {
                        *sample = match buffer.pop() {
                            Some(value) => value as f32 / i16::MAX as f32 * vol,
                            None => 0.0,
                        };
                    }
                },
                move |err| {
                    error!("音频流错误: {}", err);
                    failed.store(true, Ordering::Relaxed);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))
    }
}

impl AudioSink for AudioOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        self.failed.store(false, Ordering::Relaxed);
        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        self.paused = false;
        info!("音频输出已启动");
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| PlayerError::AudioError(format!("暂停音频流失败: {}", e)))?;
            self.paused = true;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => {
                stream
                    .play()
                    .map_err(|e| PlayerError::AudioError(format!("恢复音频流失败: {}", e)))?;
                self.paused = false;
                Ok(())
            }
            // 设备丢失时重新启动
            None => self.start(),
        }
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
        self.paused = false;
        self.clear();
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(PlayerError::AudioError("音频设备报告错误".to_string()));
        }
        if self.stream.is_none() {
            return Err(PlayerError::AudioError("音频设备未启动".to_string()));
        }

        let room = self.capacity.saturating_sub(self.buffer.len());
        let accepted = samples.len().min(room);
        for sample in &samples[..accepted] {
            self.buffer.push(*sample);
        }
        Ok(accepted)
    }

    fn buffered_bytes(&self) -> usize {
        self.buffer.len() * std::mem::size_of::<i16>()
    }

    fn clear(&mut self) {
        while self.buffer.pop().is_some() {}
    }

    fn set_volume(&mut self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn is_active(&self) -> bool {
        self.stream.is_some() && !self.paused && !self.buffer.is_empty()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
