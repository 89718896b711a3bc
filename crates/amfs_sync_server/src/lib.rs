//! Peer sync server (§4.7): accepts connections and drives the line+binary
//! sync protocol that keeps mergeable files convergent across nodes.
#![warn(missing_docs)]

/// Shared engine configuration.
pub mod config;

/// Per-connection protocol state machine.
pub mod connection;

use std::sync::Arc;

use amfs_core::Engine;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

/// Serve the sync protocol forever on `engine`'s configured listen
/// addresses, until `shutdown` resolves.
///
/// Accepts connections on the TCP address unconditionally, and additionally
/// on a Unix domain socket if one is configured (§6.5). Each connection is
/// handled on its own task (§5: "one task per connection").
pub async fn serve(
    engine: Arc<Engine>,
    config: config::Config,
    shutdown: impl std::future::Future<Output = ()>,
) -> std::io::Result<()> {
    let tcp = TcpListener::bind(&config.sync_listen).await?;
    log::info!("sync server listening on tcp://{}", config.sync_listen);

    #[cfg(unix)]
    let unix = match &config.sync_unix_socket {
        Some(path) => {
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            log::info!("sync server listening on unix://{}", path.display());
            Some(listener)
        }
        None => None,
    };

    tokio::pin!(shutdown);

    loop {
        #[cfg(unix)]
        let accept_unix = async {
            match &unix {
                Some(listener) => listener.accept().await.map(|(s, _)| Conn::Unix(s)),
                None => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let accept_unix = std::future::pending::<std::io::Result<Conn>>();

        tokio::select! {
            accepted = tcp.accept() => {
                let (socket, peer) = accepted?;
                log::info!("accepted tcp connection from {peer}");
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(err) = connection::handle(socket, engine).await {
                        log::warn!("connection from {peer} ended: {err}");
                    }
                });
            }
            accepted = accept_unix => {
                match accepted {
                    Ok(Conn::Unix(socket)) => {
                        log::info!("accepted unix socket connection");
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            if let Err(err) = connection::handle(socket, engine).await {
                                log::warn!("unix connection ended: {err}");
                            }
                        });
                    }
                    Err(err) => log::warn!("unix accept failed: {err}"),
                }
            }
            _ = &mut shutdown => {
                log::info!("shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

enum Conn {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}
