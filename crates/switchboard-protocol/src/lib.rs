//! Wire codec for the Switchboard gateway.
//!
//! - [`codec`] -- encode a [`Message`](switchboard_types::Message) to a JSON
//!   envelope and decode complete frames
//! - [`stream`] -- [`StreamDecoder`], the per-connection incremental decoder
//! - [`error`] -- [`CodecError`]
//! - [`hexdump`] -- frame dumps for trace logging

pub mod codec;
pub mod error;
pub mod hexdump;
pub mod stream;

pub use codec::{decode, encode};
pub use error::CodecError;
pub use hexdump::hexdump;
pub use stream::{DEFAULT_MAX_FRAME_BYTES, StreamDecoder};
