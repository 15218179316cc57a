// 核心数据结构和类型定义

pub mod types;
pub mod clock;
pub mod config;
pub mod error;
pub mod scheduler;

pub use types::*;
pub use clock::{PlaybackClock, ClockSnapshot, TimeSource, SystemTime, ManualTime};
pub use error::*;
