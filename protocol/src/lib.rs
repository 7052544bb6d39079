//! Wire protocol: frame codec, message envelopes, handshake, versioning.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod message;
pub mod version;

pub use codec::{read_frame, read_frame_bounded, read_frame_timeout, write_frame, MAX_FRAME_SIZE};
pub use envelope::Envelope;
pub use error::ProtocolError;
pub use handshake::{Session, SessionHello};
pub use message::{RouteEntry, RouteTable, WireMessage};
pub use version::PROTOCOL_VERSION;
