//! 网络协议处理
//!
//! 协议是封闭的枚举（[`StreamProtocol`]），按 URL scheme 选择；
//! 各协议的 FFmpeg 选项由 [`build_options`] 纯函数生成，与同步核心无关。

use crate::core::config::NetworkConfig;
use crate::core::{PlayerError, Result, StreamProtocol};
use log::{debug, info};

/// HTTP 自动重连的最大间隔（秒）
const RECONNECT_DELAY_MAX_SECS: u32 = 5;

/// 连接能力接口
pub trait StreamConnector {
    /// 建立连接前的准备（校验 URL、生成选项），返回打开输入时使用的选项
    fn connect(&mut self) -> Result<Vec<(String, String)>>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
}

impl StreamProtocol {
    /// 协议默认端口
    pub fn default_port(&self, secure: bool) -> u16 {
        match self {
            StreamProtocol::Http if secure => 443,
            StreamProtocol::Http => 80,
            StreamProtocol::Rtmp if secure => 443,
            StreamProtocol::Rtmp => 1935,
            StreamProtocol::Rtsp if secure => 322,
            StreamProtocol::Rtsp => 554,
            StreamProtocol::Udp | StreamProtocol::Tcp => 0,
        }
    }
}

/// 校验网络流 URL：scheme 可识别且带主机部分
pub fn validate_url(url: &str) -> Result<StreamProtocol> {
    let protocol = StreamProtocol::detect(url)
        .ok_or_else(|| PlayerError::InvalidUrl(format!("不支持的协议: {}", url)))?;

    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or_default();
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    // UDP 组播可写作 udp://@:1234
    let host_ok = !host.is_empty() && (protocol == StreamProtocol::Udp || !host.starts_with(':'));

    if !host_ok || url.chars().any(char::is_whitespace) {
        return Err(PlayerError::InvalidUrl(url.to_string()));
    }
    Ok(protocol)
}

/// 生成打开输入时的 FFmpeg 选项
pub fn build_options(protocol: StreamProtocol, config: &NetworkConfig) -> Vec<(String, String)> {
    let mut options: Vec<(String, String)> = Vec::new();
    let mut set = |k: &str, v: String| options.push((k.to_string(), v));

    // 公共选项（超时单位为微秒）
    set("timeout", (config.connection_timeout as u64 * 1000).to_string());
    set("rw_timeout", (config.read_timeout as u64 * 1000).to_string());
    set("buffer_size", config.buffer_size.to_string());
    set("max_delay", (config.max_latency as u64 * 1000).to_string());

    match protocol {
        StreamProtocol::Http => {
            if !config.user_agent.is_empty() {
                set("user_agent", config.user_agent.clone());
            }
            if !config.referer.is_empty() {
                set("referer", config.referer.clone());
            }
            if config.follow_redirects {
                set("followlocation", "1".into());
                set("maxredirs", config.max_redirects.to_string());
            }
            set("reconnect", "1".into());
            set("reconnect_streamed", "1".into());
            set("reconnect_delay_max", RECONNECT_DELAY_MAX_SECS.to_string());
            if let Some(proxy) = config.proxy_url() {
                set("http_proxy", proxy);
            }
        }
        StreamProtocol::Rtmp => {
            set("rtmp_live", "any".into());
        }
        StreamProtocol::Rtsp => {
            set("rtsp_transport", "tcp".into());
            if !config.user_agent.is_empty() {
                set("user_agent", config.user_agent.clone());
            }
        }
        StreamProtocol::Udp => {
            set("overrun_nonfatal", "1".into());
            set("fifo_size", (config.max_buffer_size / 188).to_string());
        }
        StreamProtocol::Tcp => {}
    }

    options
}

/// 一次网络连接会话
pub struct ProtocolSession {
    url: String,
    protocol: StreamProtocol,
    config: NetworkConfig,
    connected: bool,
}

impl ProtocolSession {
    pub fn new(url: &str, config: &NetworkConfig) -> Result<Self> {
        let protocol = validate_url(url)?;
        Ok(Self {
            url: url.to_string(),
            protocol,
            config: config.clone(),
            connected: false,
        })
    }

    pub fn protocol(&self) -> StreamProtocol {
        self.protocol
    }

    pub fn is_secure(&self) -> bool {
        StreamProtocol::is_secure_scheme(&self.url)
    }

    pub fn default_port(&self) -> u16 {
        self.protocol.default_port(self.is_secure())
    }
}

impl StreamConnector for ProtocolSession {
    fn connect(&mut self) -> Result<Vec<(String, String)>> {
        let options = build_options(self.protocol, &self.config);
        info!(
            "🌐 {} 连接准备: {}（默认端口 {}，{} 个选项）",
            self.protocol.as_str(),
            self.url,
            self.default_port(),
            options.len()
        );
        debug!("连接选项: {:?}", options);
        self.connected = true;
        Ok(options)
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!("{} 连接已断开: {}", self.protocol.as_str(), self.url);
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value<'a>(options: &'a [(String, String)], key: &str) -> Option<&'a str> {
        options.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(validate_url("http://host/a.m3u8").unwrap(), StreamProtocol::Http);
        assert_eq!(validate_url("RTSP://cam:554/live").unwrap(), StreamProtocol::Rtsp);
        assert_eq!(validate_url("udp://@:1234").unwrap(), StreamProtocol::Udp);
        assert!(validate_url("ftp://host/file").is_err());
        assert!(validate_url("http:///nohost").is_err());
        assert!(validate_url("rtmp://:1935/app").is_err());
        assert!(validate_url("/local/file.mp4").is_err());
    }

    #[test]
    fn test_common_options_use_microseconds() {
        let options = build_options(StreamProtocol::Tcp, &NetworkConfig::default());
        assert_eq!(value(&options, "timeout"), Some("10000000"));
        assert_eq!(value(&options, "buffer_size"), Some("1048576"));
    }

    #[test]
    fn test_protocol_specific_options() {
        let mut config = NetworkConfig::default();
        config.proxy_host = "proxy".into();
        config.proxy_port = 3128;

        let http = build_options(StreamProtocol::Http, &config);
        assert_eq!(value(&http, "reconnect"), Some("1"));
        assert_eq!(value(&http, "reconnect_delay_max"), Some("5"));
        assert_eq!(value(&http, "http_proxy"), Some("http://proxy:3128"));
        assert_eq!(value(&http, "maxredirs"), Some("5"));

        let rtsp = build_options(StreamProtocol::Rtsp, &config);
        assert_eq!(value(&rtsp, "rtsp_transport"), Some("tcp"));
        assert_eq!(value(&rtsp, "http_proxy"), None);

        let udp = build_options(StreamProtocol::Udp, &config);
        assert_eq!(value(&udp, "overrun_nonfatal"), Some("1"));
    }

    #[test]
    fn test_session_connect_cycle() {
        let mut session = ProtocolSession::new("https://cdn/x.m3u8", &NetworkConfig::default()).unwrap();
        assert_eq!(session.protocol(), StreamProtocol::Http);
        assert!(session.is_secure());
        assert_eq!(session.default_port(), 443);
        assert!(!session.is_connected());
        assert!(!session.connect().unwrap().is_empty());
        assert!(session.is_connected());
        session.disconnect();
        assert!(!session.is_connected());
    }
}
