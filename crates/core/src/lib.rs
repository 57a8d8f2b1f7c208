//! Real-time RTP transport for encoded audio and video.
//!
//! A host application sets a signalling address, starts a stream per
//! [`StreamKind`], and hands encoded frames to the runtime as owned
//! [`Frame`]s. Each frame's release handle fires exactly once, whether it
//! was transmitted, rejected, abandoned or lost to a transport failure.
//! H.264 parameter sets travel to a registered [`ParameterSetListener`]
//! and into the live video packetizer.

pub mod address;
pub mod config;
mod conveyor;
pub mod error;
pub mod frame;
mod kind;
pub mod media;
pub mod params;
pub mod runtime;
pub mod stats;
pub mod transport;

pub use address::{AddressRegistry, SignallingAddress};
pub use config::{RetryPolicy, RuntimeConfig, StreamConfig};
pub use error::{InvalidReason, Result, RuntimeError};
pub use frame::{Frame, FrameOutcome, ReleaseReceiver};
pub use kind::StreamKind;
pub use media::Packetizer;
pub use media::h264::H264Bitstream;
pub use params::{ParameterSet, ParameterSetChannel, ParameterSetListener, PendingPolicy};
pub use runtime::{MediaRuntime, RuntimeState, StreamRuntime};
pub use stats::StreamStats;
pub use transport::{MediaTransport, TransportConnector, UdpConnector};
