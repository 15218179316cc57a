// 播放器核心模块

pub mod demuxer;
pub mod demuxer_source;
pub mod decoder;
pub mod media_source;
pub mod protocol;
pub mod source_acquirer;
pub mod stream_loader;
pub mod audio_output;
pub mod audio_engine;
pub mod decode_loop;
pub mod sync;
pub mod seek;
pub mod manager;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use demuxer::Demuxer;
pub use demuxer_source::{DemuxerSource, MediaPacket, PacketType, SeekMode};
pub use decoder::{VideoDecoder, AudioDecoder};
pub use media_source::MediaSource;
pub use source_acquirer::SourceAcquirer;
pub use stream_loader::{LoadingStatus, StreamLoader};
pub use audio_output::AudioOutput;
pub use audio_engine::AudioEngine;
pub use manager::{PlaybackManager, PlayerBackend};
