use clap::Parser;
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use gandalf::cli::Args;
use gandalf::error::FatalError;
use gandalf::supervisor::{BootParams, Command, Supervisor};
use gandalf::{daemonize, logging, pidfile};

fn main() {
    let args = Args::parse();

    if args.is_control_mode() {
        std::process::exit(run_control_mode(&args));
    }

    if args.daemonize {
        if let Err(e) = daemonize::daemonize() {
            eprintln!("failed to daemonize: {e}");
            std::process::exit(e.exit_code());
        }
    }

    if let Err(e) = logging::init(args.verbose, args.daemonize) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(e.exit_code());
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(4);
        }
    };

    let exit_code = runtime.block_on(run_daemon(args));
    std::process::exit(exit_code);
}

/// Dispatches `--reload`/`--shutdown`/`--status` without ever touching the
/// Supervisor's own process; only the pidfile is consulted (§4.10).
fn run_control_mode(args: &Args) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return 4;
        }
    };

    runtime.block_on(async {
        if args.status {
            return status_control(&args.pidfile, args.status_addr).await;
        }

        let sig = if args.reload {
            Signal::SIGUSR1
        } else {
            Signal::SIGUSR2
        };

        match pidfile::signal_running_daemon(&args.pidfile, sig).await {
            Ok(outcome) => outcome.exit_code(),
            Err(e) => {
                eprintln!("{e}");
                e.exit_code()
            }
        }
    })
}

async fn status_control(pidfile: &std::path::Path, status_addr: std::net::SocketAddr) -> i32 {
    use tokio::io::AsyncReadExt;

    if pidfile::read(pidfile).await.is_err() {
        eprintln!("no pidfile at {}", pidfile.display());
        return 5;
    }

    match tokio::net::TcpStream::connect(status_addr).await {
        Ok(mut stream) => {
            let mut buf = String::new();
            if stream.read_to_string(&mut buf).await.is_ok() {
                println!("{}", buf.trim_end());
                0
            } else {
                eprintln!("failed to read status response");
                4
            }
        }
        Err(e) => {
            eprintln!("failed to reach status server at {status_addr}: {e}");
            4
        }
    }
}

async fn run_daemon(args: Args) -> i32 {
    let params = BootParams {
        mapping_path: args.mapping.clone().expect("required unless control mode"),
        usbmuxd_socket: args.usbmuxd_socket.clone(),
        idle_timeout: args.idle_timeout(),
        status_addr: args.status_addr(),
        max_retries: args.max_retries,
        retry_wait: args.retry_wait(),
    };

    let supervisor = match Supervisor::boot(params).await {
        Ok(s) => s,
        Err(e) => return fatal(e),
    };

    if let Err(e) = pidfile::write(&args.pidfile, std::process::id()).await {
        return fatal(e);
    }

    let command_tx = supervisor.command_sender();
    spawn_signal_handlers(command_tx);

    supervisor.run().await;
    pidfile::remove(&args.pidfile).await;
    0
}

fn fatal(e: FatalError) -> i32 {
    match &e {
        FatalError::AddressInUse { addr } => {
            error!(%addr, "address already in use, another relay is likely running");
        }
        _ => error!(error = %e, "please report, unhandled async exception"),
    }
    e.exit_code()
}

/// Installs the control-surface signal handlers (§6): `SIGUSR1` reloads,
/// `SIGUSR2`/`SIGTERM` shut down gracefully, `SIGPIPE` is ignored so a
/// broken tunnel peer never kills the process. Handlers only post onto the
/// command channel and return promptly (§5, §9 — no mutual recursion with
/// the boot routine).
fn spawn_signal_handlers(command_tx: tokio::sync::mpsc::UnboundedSender<Command>) {
    let mut usr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
    let mut usr2 = signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut pipe = signal(SignalKind::pipe()).expect("failed to install SIGPIPE handler");

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = usr1.recv() => {
                    info!("SIGUSR1 received, reloading");
                    let _ = command_tx.send(Command::Reload);
                }
                _ = usr2.recv() => {
                    info!("SIGUSR2 received, shutting down");
                    let _ = command_tx.send(Command::Shutdown);
                    return;
                }
                _ = term.recv() => {
                    info!("SIGTERM received, shutting down");
                    let _ = command_tx.send(Command::Shutdown);
                    return;
                }
                _ = pipe.recv() => {
                    // Ignored: a broken tunnel peer must not kill the process.
                }
            }
        }
    });
}
