//! The per-tunnel TCP listener and byte-splicing loop (§4.4).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use gandalf_usbmuxd::{ConnectOutcome, MuxSession, ResultCode};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Matches the teacher's own `iproxy` tool: usbmuxd is chatty and SSH
/// sessions move multi-KiB frames, so a 4 KiB buffer measurably underperforms.
pub const BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub local_port: u16,
    pub device_id: u32,
    pub device_port: u16,
    pub idle_timeout: Duration,
    pub usbmuxd_socket: PathBuf,
}

/// One running tunnel: a bound TCP listener plus the handle needed to stop
/// accepting new connections on reload/shutdown (§4.6.2).
pub struct Tunnel {
    pub local_port: u16,
    stop: tokio::sync::watch::Sender<bool>,
    accept_loop: tokio::task::JoinHandle<()>,
}

impl Tunnel {
    /// Binds the loopback listener and spawns the accept loop. Returns
    /// `Err` on bind failure, including address-in-use (§4.6.3, exit 6).
    pub async fn spawn(config: TunnelConfig) -> io::Result<Self> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.local_port);
        let listener = TcpListener::bind(bind_addr).await?;
        info!(
            local_port = config.local_port,
            device_id = config.device_id,
            device_port = config.device_port,
            "tunnel listening"
        );

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let local_port = config.local_port;
        let accept_loop = tokio::spawn(accept_loop(listener, config, stop_rx));

        Ok(Self {
            local_port,
            stop: stop_tx,
            accept_loop,
        })
    }

    /// Stops accepting new connections and waits for the accept loop to
    /// exit. In-flight accepted connections may finish their current
    /// read/write before observing the close (§5).
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.accept_loop.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: TunnelConfig,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                debug!(local_port = config.local_port, "tunnel shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(local_port = config.local_port, %peer, "accepted connection");
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &config).await {
                                warn!(local_port = config.local_port, error = %e, "tunnel connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(local_port = config.local_port, error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn handle_connection(client: TcpStream, config: &TunnelConfig) -> io::Result<()> {
    let session = MuxSession::connect(&config.usbmuxd_socket)
        .await
        .map_err(to_io_error)?;

    let device_stream = match session
        .request_connect(config.device_id, config.device_port)
        .await
        .map_err(to_io_error)?
    {
        ConnectOutcome::Connected(stream) => stream,
        ConnectOutcome::Refused(ResultCode::DeviceRequestedNotConnected) => {
            info!(device_id = config.device_id, "device requested but not connected");
            return Ok(());
        }
        ConnectOutcome::Refused(ResultCode::PortRequestedNotAvailable) => {
            info!(
                device_id = config.device_id,
                device_port = config.device_port,
                "port requested wasn't available"
            );
            return Ok(());
        }
        ConnectOutcome::Refused(_) => return Ok(()),
    };

    splice(client, device_stream, config.idle_timeout).await
}

/// Runs the two copy directions as genuinely independent tasks, each with
/// its own idle clock. A chatty client must never reset the device
/// direction's timeout, and vice versa (§4.4, §5): "a read that produces
/// no bytes within T seconds cancels the pair" is per-direction, not
/// whichever direction happens to wake the `select!` first.
async fn splice(
    client: TcpStream,
    device: tokio::net::UnixStream,
    idle_timeout: Duration,
) -> io::Result<()> {
    let (client_read, client_write) = client.into_split();
    let (device_read, device_write) = device.into_split();

    let mut to_device = tokio::spawn(copy_until_idle(client_read, device_write, idle_timeout));
    let mut to_client = tokio::spawn(copy_until_idle(device_read, client_write, idle_timeout));

    let result = tokio::select! {
        r = &mut to_device => { to_client.abort(); r }
        r = &mut to_client => { to_device.abort(); r }
    };

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(()), // the other direction was aborted; not an error
    }
}

/// Copies from `read_half` to `write_half` until EOF, an I/O error, or
/// `idle_timeout` elapses with no bytes read. The timeout is recreated
/// only after each successful read, so it tracks this direction's own
/// traffic and nothing else's.
async fn copy_until_idle<R, W>(
    mut read_half: R,
    mut write_half: W,
    idle_timeout: Duration,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        match tokio::time::timeout(idle_timeout, read_half.read(&mut buf)).await {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => write_half.write_all(&buf[..n]).await?,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()), // this direction alone has been idle past the timeout
        }
    }
}

fn to_io_error(e: gandalf_usbmuxd::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}
