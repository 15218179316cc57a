//! 网络参数与引擎配置

use crate::core::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 网络调优参数
///
/// 以扁平的 `key=value;key=value` 记录传入（见 [`FromStr`] / [`fmt::Display`]），
/// 加载开始后以 `Arc<NetworkConfig>` 只读方式交给加载线程。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    // 连接
    pub connection_timeout: u32, // ms
    pub read_timeout: u32,       // ms
    pub max_retries: u32,
    pub retry_delay: u32, // ms

    // 缓冲
    pub buffer_size: u32,
    pub max_buffer_size: u32,
    pub min_buffer_threshold: u32, // %
    pub max_buffer_threshold: u32, // %

    // HTTP
    pub user_agent: String,
    pub referer: String,
    pub follow_redirects: bool,
    pub max_redirects: u32,

    // 代理
    pub proxy_host: String,
    pub proxy_port: u16,
    pub proxy_user: String,
    pub proxy_password: String,

    // 质量控制
    pub enable_quality_control: bool,
    pub target_bitrate: u32, // kbps
    pub max_latency: u32,    // ms
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connection_timeout: 10_000,
            read_timeout: 5_000,
            max_retries: 3,
            retry_delay: 1_000,
            buffer_size: 1024 * 1024,
            max_buffer_size: 10 * 1024 * 1024,
            min_buffer_threshold: 20,
            max_buffer_threshold: 80,
            user_agent: "myy_sync_player".to_string(),
            referer: String::new(),
            follow_redirects: true,
            max_redirects: 5,
            proxy_host: String::new(),
            proxy_port: 0,
            proxy_user: String::new(),
            proxy_password: String::new(),
            enable_quality_control: true,
            target_bitrate: 2_000,
            max_latency: 3_000,
        }
    }
}

fn check(ok: bool, field: &str, value: impl fmt::Display) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(PlayerError::ConfigError(format!("{}={} 超出允许范围", field, value)))
    }
}

impl NetworkConfig {
    /// 校验取值范围，返回第一个越界字段
    pub fn validate(&self) -> Result<()> {
        check(
            (1..=60_000).contains(&self.connection_timeout),
            "connectionTimeout",
            self.connection_timeout,
        )?;
        check(
            (1..=30_000).contains(&self.read_timeout),
            "readTimeout",
            self.read_timeout,
        )?;
        check(self.max_retries <= 10, "maxRetries", self.max_retries)?;
        check(self.retry_delay <= 10_000, "retryDelay", self.retry_delay)?;
        check(
            self.buffer_size > 0 && self.buffer_size <= self.max_buffer_size,
            "bufferSize",
            self.buffer_size,
        )?;
        check(
            self.min_buffer_threshold < self.max_buffer_threshold,
            "minBufferThreshold",
            self.min_buffer_threshold,
        )?;
        check(
            self.max_buffer_threshold <= 100,
            "maxBufferThreshold",
            self.max_buffer_threshold,
        )?;
        check(self.max_redirects <= 20, "maxRedirects", self.max_redirects)?;
        check(
            (1..=100_000).contains(&self.target_bitrate),
            "targetBitrate",
            self.target_bitrate,
        )?;
        check(
            (1..=60_000).contains(&self.max_latency),
            "maxLatency",
            self.max_latency,
        )?;
        // `;` 是记录分隔符，文本字段中出现时无法原样解析回来
        for (field, value) in [
            ("userAgent", &self.user_agent),
            ("referer", &self.referer),
            ("proxyHost", &self.proxy_host),
            ("proxyUser", &self.proxy_user),
            ("proxyPassword", &self.proxy_password),
        ] {
            check(!value.contains(';'), field, value)?;
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout as u64)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout as u64)
    }

    pub fn has_proxy(&self) -> bool {
        !self.proxy_host.is_empty() && self.proxy_port > 0
    }

    /// 代理 URL（含认证信息时带 user:password@）
    pub fn proxy_url(&self) -> Option<String> {
        if !self.has_proxy() {
            return None;
        }
        let auth = if self.proxy_user.is_empty() {
            String::new()
        } else {
            format!("{}:{}@", self.proxy_user, self.proxy_password)
        };
        Some(format!("http://{}{}:{}", auth, self.proxy_host, self.proxy_port))
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        fn num<T: FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| PlayerError::ConfigError(format!("{} 的取值无效: {:?}", key, value)))
        }
        let flag = |v: &str| v.eq_ignore_ascii_case("true");

        match key {
            "connectionTimeout" => self.connection_timeout = num(key, value)?,
            "readTimeout" => self.read_timeout = num(key, value)?,
            "maxRetries" => self.max_retries = num(key, value)?,
            "retryDelay" => self.retry_delay = num(key, value)?,
            "bufferSize" => self.buffer_size = num(key, value)?,
            "maxBufferSize" => self.max_buffer_size = num(key, value)?,
            "minBufferThreshold" => self.min_buffer_threshold = num(key, value)?,
            "maxBufferThreshold" => self.max_buffer_threshold = num(key, value)?,
            "userAgent" => self.user_agent = value.to_string(),
            "referer" => self.referer = value.to_string(),
            "followRedirects" => self.follow_redirects = flag(value),
            "maxRedirects" => self.max_redirects = num(key, value)?,
            "proxyHost" => self.proxy_host = value.to_string(),
            "proxyPort" => self.proxy_port = num(key, value)?,
            "proxyUser" => self.proxy_user = value.to_string(),
            "proxyPassword" => self.proxy_password = value.to_string(),
            "enableQualityControl" => self.enable_quality_control = flag(value),
            "targetBitrate" => self.target_bitrate = num(key, value)?,
            "maxLatency" => self.max_latency = num(key, value)?,
            other => log::debug!("忽略未知网络参数: {}", other),
        }
        Ok(())
    }
}

impl FromStr for NetworkConfig {
    type Err = PlayerError;

    /// 从默认值出发应用记录中的字段；缺 `=` 的片段跳过
    fn from_str(s: &str) -> Result<Self> {
        let mut config = NetworkConfig::default();
        for part in s.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            config.apply(key.trim(), value.trim())?;
        }
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bool_str = |b: bool| if b { "true" } else { "false" };
        write!(
            f,
            "connectionTimeout={};readTimeout={};maxRetries={};retryDelay={};\
             bufferSize={};maxBufferSize={};minBufferThreshold={};maxBufferThreshold={};\
             userAgent={};referer={};followRedirects={};maxRedirects={};\
             proxyHost={};proxyPort={};proxyUser={};proxyPassword={};\
             enableQualityControl={};targetBitrate={};maxLatency={}",
            self.connection_timeout,
            self.read_timeout,
            self.max_retries,
            self.retry_delay,
            self.buffer_size,
            self.max_buffer_size,
            self.min_buffer_threshold,
            self.max_buffer_threshold,
            self.user_agent,
            self.referer,
            bool_str(self.follow_redirects),
            self.max_redirects,
            self.proxy_host,
            self.proxy_port,
            self.proxy_user,
            self.proxy_password,
            bool_str(self.enable_quality_control),
            self.target_bitrate,
            self.max_latency,
        )
    }
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerConfig {
    pub network: NetworkConfig,
    /// 网络流加载超时（毫秒）
    pub remote_timeout_ms: u64,
    /// 解码起步阶段（前 5 帧）是否拒绝 Seek
    pub reject_seek_while_unstable: bool,
    /// 初始音量 0.0 - 1.0
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            remote_timeout_ms: 15_000,
            reject_seek_while_unstable: false,
            volume: 1.0,
        }
    }
}
