//! A minimal usbmuxd wire-protocol client: frame codec, Listen/Connect
//! message codec, and a session type for request/reply and event
//! subscription usage.

pub mod device;
pub mod error;
pub mod frame;
pub mod message;
pub mod session;

pub use device::Device;
pub use error::Error;
pub use message::{Reply, Request, ResultCode};
pub use session::{ConnectOutcome, MuxSession};
