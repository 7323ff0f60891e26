// RTMP client library: handshake, chunk-stream codec, session controller
// (NetConnection), logical stream (NetStream), AVC demuxer, and a
// pull-based media sink, for consuming a server-side audio/video stream.

pub mod amf;
pub mod avc;
pub mod config;
pub mod error;
pub mod io_adapter;
pub mod log;
pub mod media_sink;
pub mod net_connection;
pub mod net_stream;
pub mod rtmp;
pub mod uri;
pub mod utils;

pub use config::RtmpClientConfig;
pub use error::{Result, RtmpError};
pub use media_sink::{AudioSample, Sample, SampleKind, VideoSample};
pub use net_connection::{NetConnection, SessionEvent};
pub use net_stream::{NetStream, StreamEvent};
pub use uri::RtmpUri;
