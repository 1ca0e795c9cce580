use thiserror::Error;

/// Errors raised by the usbmuxd wire-protocol client.
#[derive(Error, Debug)]
pub enum Error {
    #[error("usbmuxd socket io failed")]
    Socket(#[from] std::io::Error),

    #[error("malformed usbmuxd frame: {0}")]
    Protocol(&'static str),

    #[error("plist encode/decode failed")]
    Plist(#[from] plist::Error),

    #[error("unknown usbmuxd reply: {0}")]
    UnknownReply(String),

    #[error("unknown usbmuxd result code: {0}")]
    UnknownResultCode(i64),

    #[error("usbmuxd reply was missing a required field: {0}")]
    MissingField(&'static str),
}
