//! Wire protocol spoken between the broker and the privileged `runas-helper`.
//!
//! The broker never authenticates anyone itself. It starts the helper with piped
//! stdio, writes exactly one request frame to the helper's stdin and, for probe
//! requests only, reads exactly one reply frame from the helper's stdout.
//!
//! A frame is a little-endian `u32` byte count followed by that many bytes of UTF-8
//! JSON. Requests are JSON objects; replies are a two element array
//! `[tag, payload]` whose tag selects how the payload is interpreted.
//!
//! ### Probe flow
//!
//! Broker      Helper
//!   |
//!   o--(spawn)-->o
//!   |            |
//!   o--(AuthOnly)->o
//!   |            |
//!   |            o--(pam)
//!   |            |
//!   o<-[tag, payload]--o
//!   |            |
//!   o<--(exit 0)-x
//!
//! ### Run flow
//!
//! Broker      Helper          Worker
//!   |
//!   o--(spawn -q)-->o
//!   |               |
//!   o--(AuthAndRun)->o
//!   |               |
//!   x               o--(setuid, exec)-->o
//!                                       |
//!  (caller owns the worker from here)   .
//!
mod frame;
mod request;
mod response;

pub use frame::FrameError;
pub use frame::MAX_FRAME_SIZE;
pub use frame::read_frame;
pub use frame::write_frame;
pub use request::AuthRequest;
pub use request::Secret;
pub use response::AuthResponse;
pub use response::ProtocolError;
pub use response::ReplyTag;
pub use response::encode_reply;
