//! The Supervisor (C6): boot sequence, retry wrapper, and the
//! signal-driven reload/shutdown loop (§4.6).

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::error::FatalError;
use crate::inventory::{self, Inventory};
use crate::mapping;
use crate::status;
use crate::tunnel::{Tunnel, TunnelConfig};

/// Compile-time platform tag, used only to color log output (§9 — no
/// shelling out to `uname`).
pub const PLATFORM: &str = if cfg!(target_os = "macos") {
    "macos"
} else if cfg!(target_os = "linux") {
    "linux"
} else if cfg!(target_os = "windows") {
    "windows"
} else {
    "unknown"
};

/// The bootstrap subscription is given this long to observe usbmuxd's
/// initial burst of `Attached` events before the Inventory is considered
/// populated enough to spawn tunnels (§4.6 step 4).
pub const BOOTSTRAP_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct BootParams {
    pub mapping_path: PathBuf,
    pub usbmuxd_socket: PathBuf,
    pub idle_timeout: Duration,
    pub status_addr: Option<SocketAddr>,
    pub max_retries: u32,
    pub retry_wait: Duration,
}

/// A command posted onto the Supervisor's channel, either by a signal
/// handler or (in tests) directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reload,
    Shutdown,
}

pub struct Supervisor {
    params: BootParams,
    inventory: Arc<Inventory>,
    tunnels: Mutex<Vec<Tunnel>>,
    commands: Mutex<mpsc::UnboundedReceiver<Command>>,
    command_tx: mpsc::UnboundedSender<Command>,
    subscription: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Supervisor {
    /// Runs the full boot sequence (§4.6 steps 1-8) and returns a
    /// `Supervisor` ready to have `run` called on it to block on the
    /// command channel (step 9).
    pub async fn boot(params: BootParams) -> Result<Self, FatalError> {
        info!(platform = PLATFORM, "booting");

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let inventory = Arc::new(Inventory::new(params.mapping_path.clone(), mapping::Mapping::default()));

        retry(params.max_retries, params.retry_wait, "bootstrap inventory", {
            let params = params.clone();
            let inventory = Arc::clone(&inventory);
            move || bootstrap_inventory(params.clone(), Arc::clone(&inventory))
        })
        .await?;

        let supervisor = Self {
            params,
            inventory,
            tunnels: Mutex::new(Vec::new()),
            commands: Mutex::new(command_rx),
            command_tx,
            subscription: Mutex::new(None),
        };

        supervisor.start_status_server();
        supervisor.spawn_tunnels_from_snapshot().await?;
        supervisor.spawn_inventory_subscription().await;

        Ok(supervisor)
    }

    /// A cloneable handle signal handlers can hold to post commands
    /// without borrowing the Supervisor itself.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.command_tx.clone()
    }

    /// Blocks until a `Shutdown` command is drained, handling any number
    /// of `Reload` commands along the way (§4.6 step 9).
    pub async fn run(&self) {
        loop {
            let command = self.commands.lock().await.recv().await;
            match command {
                Some(Command::Reload) => {
                    if let Err(e) = self.reload().await {
                        error!(error = %e, "reload failed");
                    }
                }
                Some(Command::Shutdown) | None => {
                    self.shutdown().await;
                    return;
                }
            }
        }
    }

    async fn spawn_tunnels_from_snapshot(&self) -> Result<(), FatalError> {
        let specs = self.inventory.snapshot().await;
        let mut tunnels = self.tunnels.lock().await;
        for spec in specs {
            let config = TunnelConfig {
                local_port: spec.local_port,
                device_id: spec.device_id,
                device_port: spec.device_port,
                idle_timeout: self.params.idle_timeout,
                usbmuxd_socket: self.params.usbmuxd_socket.clone(),
            };
            match Tunnel::spawn(config).await {
                Ok(tunnel) => tunnels.push(tunnel),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    return Err(FatalError::AddressInUse {
                        addr: SocketAddr::new(
                            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                            spec.local_port,
                        ),
                    });
                }
                Err(e) => return Err(FatalError::Unhandled(e)),
            }
        }
        Ok(())
    }

    /// Spawns the long-lived event subscription, aborting whatever
    /// subscription was previously running. Only one should ever be alive
    /// at a time (§9, single subscriber) — without this, a reload would
    /// leave the old subscription's usbmuxd connection open alongside the
    /// new one.
    async fn spawn_inventory_subscription(&self) {
        let inventory = Arc::clone(&self.inventory);
        let socket = self.params.usbmuxd_socket.clone();
        let max_retries = self.params.max_retries;
        let retry_wait = self.params.retry_wait;

        let handle = tokio::spawn(async move {
            let result = retry(max_retries, retry_wait, "device inventory subscription", {
                let inventory = Arc::clone(&inventory);
                let socket = socket.clone();
                move || run_subscription(socket.clone(), Arc::clone(&inventory))
            })
            .await;
            if let Err(e) = result {
                error!(error = %e, "device inventory subscription gave up permanently");
            }
        });

        if let Some(previous) = self.subscription.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn stop_subscription(&self) {
        if let Some(handle) = self.subscription.lock().await.take() {
            handle.abort();
        }
    }

    fn start_status_server(&self) {
        let Some(addr) = self.params.status_addr else {
            return;
        };
        let inventory = Arc::clone(&self.inventory);
        tokio::spawn(async move {
            if let Err(e) = status::run(addr, inventory).await {
                error!(%addr, error = %e, "status server exited");
            }
        });
    }

    /// §4.6.2: tear down every tunnel, then restart the boot sequence at
    /// step 4 in full — stop the old subscription, rebuild the inventory
    /// from scratch against the fresh mapping, and re-subscribe — unless
    /// the mapping file has vanished, in which case keep running with the
    /// status quo.
    async fn reload(&self) -> Result<(), FatalError> {
        if tokio::fs::metadata(&self.params.mapping_path).await.is_err() {
            warn!(
                path = %self.params.mapping_path.display(),
                "mapping file missing on reload, keeping previous tunnels"
            );
            return Ok(());
        }

        self.close_all_tunnels().await;
        self.stop_subscription().await;

        retry(self.params.max_retries, self.params.retry_wait, "bootstrap inventory", {
            let params = self.params.clone();
            let inventory = Arc::clone(&self.inventory);
            move || bootstrap_inventory(params.clone(), Arc::clone(&inventory))
        })
        .await?;

        self.spawn_inventory_subscription().await;
        self.spawn_tunnels_from_snapshot().await
    }

    async fn shutdown(&self) {
        self.close_all_tunnels().await;
        self.stop_subscription().await;
        info!("shutdown complete");
    }

    async fn close_all_tunnels(&self) {
        let mut tunnels = self.tunnels.lock().await;
        let count = tunnels.len();
        for tunnel in tunnels.drain(..) {
            tunnel.shutdown().await;
        }
        info!(count, "closed tunnels");
    }
}

/// Error surfaced by [`bootstrap_inventory`]: either the mapping file failed
/// to parse or the bootstrap subscription itself errored out. Both are
/// retried by the same `retry` wrapper that retries a plain subscription
/// (§4.6.1, §7: "mapping parse failure at boot → retried").
#[derive(Debug)]
enum BootstrapError {
    Mapping(mapping::ParseError),
    Subscription(gandalf_usbmuxd::Error),
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::Mapping(e) => write!(f, "mapping: {e}"),
            BootstrapError::Subscription(e) => write!(f, "subscription: {e}"),
        }
    }
}

/// Rebuilds `inventory` from scratch against the mapping currently on disk,
/// then drains usbmuxd's initial burst of `Attached` events into it (§3,
/// §4.6 step 4). A malformed mapping file is propagated rather than
/// silently replaced by an empty one, so the caller's retry wrapper gets a
/// chance to act on it.
async fn bootstrap_inventory(
    params: BootParams,
    inventory: Arc<Inventory>,
) -> Result<(), BootstrapError> {
    let initial_mapping = mapping::load(&params.mapping_path)
        .await
        .map_err(BootstrapError::Mapping)?;
    inventory.reset(initial_mapping).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let socket = params.usbmuxd_socket.clone();
    let subscription = tokio::spawn(inventory::subscribe(socket, tx));

    let drain_burst = async {
        while let Some(event) = rx.recv().await {
            inventory.apply_event(event).await;
        }
    };

    if tokio::time::timeout(BOOTSTRAP_DEADLINE, drain_burst)
        .await
        .is_err()
    {
        // Deadline expired with the subscription still alive: this is the
        // expected path (§4.6 step 4). The bootstrap connection is purely
        // for the initial burst; abort it so only the long-lived
        // subscription spawned later remains open (§9, single subscriber).
        subscription.abort();
    } else {
        // The channel closed because the subscription task ended already;
        // surface whatever error it produced, if any.
        if let Ok(Err(e)) = subscription.await {
            return Err(BootstrapError::Subscription(e));
        }
    }

    Ok(())
}

async fn run_subscription(
    socket: PathBuf,
    inventory: Arc<Inventory>,
) -> Result<(), gandalf_usbmuxd::Error> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = tokio::spawn(inventory::subscribe(socket, tx));

    while let Some(event) = rx.recv().await {
        inventory.apply_event(event).await;
    }

    subscription.await.unwrap_or(Ok(()))
}

/// §4.6.1: retries `task` up to `max_retries` times, sleeping
/// `wait_between_failure` between attempts. Cancellation is reported as
/// success, matching the teacher's treatment of cancellation as not an
/// error.
async fn retry<T, E, F, Fut>(
    max_retries: u32,
    wait_between_failure: Duration,
    name: &str,
    mut task: F,
) -> Result<T, FatalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match task().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_retries {
                    info!(name, attempt, "tried {} times and gave up", attempt);
                    return Err(FatalError::Unhandled(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("{name}: {e}"),
                    )));
                }
                warn!(name, attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(wait_between_failure).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_is_one_of_the_known_tags() {
        assert!(["macos", "linux", "windows", "unknown"].contains(&PLATFORM));
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries() {
        let mut attempts = 0;
        let result: Result<(), FatalError> = retry(3, Duration::from_millis(1), "test", || {
            attempts += 1;
            async move {
                Err::<(), _>(gandalf_usbmuxd::Error::Protocol("boom"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn retry_succeeds_on_first_try() {
        let result = retry(3, Duration::from_millis(1), "test", || async {
            Ok::<_, gandalf_usbmuxd::Error>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }
}
