//! One usbmuxd connection, used either for a single request/reply exchange
//! or as a long-lived event subscription (§4.3).

use std::path::{Path, PathBuf};

use tokio::net::UnixStream;

use crate::error::Error;
use crate::frame;
use crate::message::{self, Reply, Request, ResultCode};

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/usbmuxd";

/// Resolves the usbmuxd socket path: `USBMUXD_SOCKET_ADDRESS` if set,
/// otherwise [`DEFAULT_SOCKET_PATH`].
pub fn default_socket_path() -> PathBuf {
    std::env::var_os("USBMUXD_SOCKET_ADDRESS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Outcome of a `Connect` request: either the session's socket is handed
/// back as a raw byte pipe to the device, or usbmuxd refused it.
pub enum ConnectOutcome {
    Connected(UnixStream),
    Refused(ResultCode),
}

impl std::fmt::Debug for ConnectOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectOutcome::Connected(_) => write!(f, "Connected"),
            ConnectOutcome::Refused(code) => write!(f, "Refused({code:?})"),
        }
    }
}

/// A single connection to usbmuxd. Owns the socket for its whole lifetime;
/// dropping it (or any exit path) closes the socket.
pub struct MuxSession {
    stream: UnixStream,
}

impl MuxSession {
    /// Opens a fresh connection to the usbmuxd socket at `path`.
    pub async fn connect(path: &Path) -> Result<Self, Error> {
        let stream = UnixStream::connect(path).await.map_err(Error::Socket)?;
        Ok(Self { stream })
    }

    /// Opens a fresh connection using [`default_socket_path`].
    pub async fn connect_default() -> Result<Self, Error> {
        Self::connect(&default_socket_path()).await
    }

    async fn send(&mut self, req: &Request) -> Result<(), Error> {
        let payload = req.encode()?;
        frame::write_frame(&mut self.stream, &payload).await
    }

    async fn recv(&mut self) -> Result<Reply, Error> {
        let header = frame::read_header(&mut self.stream).await?;
        let payload = frame::read_payload(&mut self.stream, &header).await?;
        message::decode(&payload)
    }

    /// Sends a `Connect` for `(device_id, device_port)` and reads exactly
    /// one reply. On success the session's socket is handed back as a raw
    /// tunnel to the device; usbmuxd does not require a further handshake.
    pub async fn request_connect(
        mut self,
        device_id: u32,
        device_port: u16,
    ) -> Result<ConnectOutcome, Error> {
        self.send(&Request::Connect {
            device_id,
            device_port,
        })
        .await?;

        match self.recv().await? {
            Reply::Result(ResultCode::Success) => Ok(ConnectOutcome::Connected(self.stream)),
            Reply::Result(code) => Ok(ConnectOutcome::Refused(code)),
            other => Err(Error::UnknownReply(format!("{other:?}"))),
        }
    }

    /// Subscribes to attach/detach events. `on_event` is invoked for every
    /// `Attached`/`Detached` frame after the initial `Listen` handshake
    /// succeeds. Returns only on socket error or cancellation; callers that
    /// want a time-bounded initial burst should wrap the call in
    /// `tokio::time::timeout`.
    pub async fn listen_events(mut self, mut on_event: impl FnMut(Reply)) -> Result<(), Error> {
        self.send(&Request::Listen).await?;

        match self.recv().await? {
            Reply::Result(ResultCode::Success) => {}
            Reply::Result(code) => {
                return Err(Error::UnknownReply(format!("Listen refused: {code:?}")));
            }
            other => return Err(Error::UnknownReply(format!("{other:?}"))),
        }

        loop {
            let event = self.recv().await?;
            on_event(event);
        }
    }
}
