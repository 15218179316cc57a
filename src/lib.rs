//! 播放同步引擎
//!
//! 解封装 / 解码循环驱动视频帧，音频引擎由解码后的采样推导音频时钟，
//! 同步校正器按漂移量调整音频主时钟，Seek 协调器打断并重新定位解码循环，
//! 网络流在工作线程中异步加载，支持超时与取消。

pub mod core;
pub mod player;
pub mod renderer;

pub use crate::core::config::{NetworkConfig, PlayerConfig};
pub use crate::core::{PlayerError, PlayerEvent, PlayerState, Result};
pub use crate::player::{PlaybackManager, PlayerBackend};
