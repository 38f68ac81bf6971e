use crate::cli::Cli;
use crate::error::AppError;
use crate::http::handle_client;
use crate::upload::CollisionPolicy;
use log::{debug, error, info, warn};
use rand::Rng;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Read-only settings shared by every connection handler.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Canonical served root. GET targets never resolve outside it.
    pub root: PathBuf,
    pub upload_dir: PathBuf,
    pub chunk_size: usize,
    pub collision_policy: CollisionPolicy,
    pub read_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        let root = cli.directory.canonicalize().map_err(|_| {
            AppError::DirectoryNotFound(cli.directory.to_string_lossy().into_owned())
        })?;
        if !root.is_dir() {
            return Err(AppError::DirectoryNotFound(
                cli.directory.to_string_lossy().into_owned(),
            ));
        }
        if cli.chunk_size == 0 {
            return Err(AppError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            upload_dir: root.join(&cli.upload_dir),
            root,
            chunk_size: cli.chunk_size,
            collision_policy: cli.on_collision,
            read_timeout: cli.read_timeout.map(Duration::from_secs),
        })
    }
}

/// Accepts connections until `shutdown_rx` fires, one thread per connection.
///
/// When given, `addr_tx` receives the bound address once the listener is up.
pub fn run_server(
    cli: Cli,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    addr_tx: Option<mpsc::Sender<SocketAddr>>,
) -> Result<(), AppError> {
    let config = Arc::new(ServerConfig::from_cli(&cli)?);

    let bind_address = format!("{}:{}", cli.listen, cli.port);
    let listener = TcpListener::bind(&bind_address)?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    if let Some(tx) = addr_tx {
        if tx.send(local_addr).is_err() {
            return Err(AppError::InternalServerError(
                "Failed to send server address to test thread".to_string(),
            ));
        }
    }

    info!(
        "Server listening on {} for directory '{}' (uploads to '{}', on collision: {:?})",
        local_addr,
        config.root.display(),
        config.upload_dir.display(),
        config.collision_policy
    );
    if let Some(timeout) = config.read_timeout {
        warn!("Client read timeout enabled: {timeout:?}");
    }

    'server_loop: loop {
        if let Some(ref rx) = shutdown_rx {
            if rx.try_recv().is_ok() {
                info!("Shutdown signal received. Shutting down gracefully.");
                break 'server_loop;
            }
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                let request_id = generate_request_id();
                let log_prefix = format!("[ReqID: {request_id}][Peer: {peer}]");

                // Accepted sockets may inherit non-blocking mode from the listener.
                if let Err(e) = stream.set_nonblocking(false) {
                    error!("{log_prefix} Unable to configure connection: {e}");
                    continue;
                }

                let config = Arc::clone(&config);
                let spawned = thread::Builder::new()
                    .name(format!("conn-{request_id}"))
                    .spawn(move || {
                        debug!("{log_prefix} Handling client connection");
                        match handle_client(stream, &config, &log_prefix) {
                            Ok(()) => debug!("{log_prefix} Client handled successfully"),
                            Err(e) => warn!("{log_prefix} Connection ended with error: {e}"),
                        }
                    });
                if let Err(e) = spawned {
                    error!("Unable to spawn handler thread for {peer}: {e}");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(e) => {
                error!("Error accepting connection: {e}");
            }
        }
    }

    info!("Server shutting down gracefully.");
    Ok(())
}

fn generate_request_id() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
