use std::{future::Future, time::Duration};

use log::{info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select, spawn,
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::shutdown::{DerivedToken, ShutdownController, ShutdownToken};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Start a TCP server and run it in the background.
///
/// The accept loop and every accepted connection hold a [`ShutdownToken`], so
/// a shutdown of `controller` waits for all of them. The loop stops accepting
/// once quit is requested or `stop` is cancelled, whichever comes first.
pub fn run_tcp_server<Handler: ConnectionHandler>(
    listener: TcpListener,
    controller: &ShutdownController,
    stop: &CancellationToken,
    handler: Handler,
) -> JoinHandle<()> {
    let accept_token = controller.token();
    let stop = controller.derive(stop);

    spawn(async move {
        let mut next_id = 0u64;
        loop {
            let (stream, addr) = select! {
                conn = listener.accept() => match conn {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                        if back_off(&stop).await {
                            continue;
                        }
                        break;
                    }
                },
                _ = stop.cancelled() => break,
            };

            let client_id = next_id;
            next_id += 1;

            info!("Connected to client {client_id} at {addr}");

            let token = accept_token.controller().token();
            let handler = handler.clone();
            spawn(async move {
                match handler.handle_connection(stream, token, client_id).await {
                    Ok(()) => info!("Disconnected from client {client_id}"),
                    Err(e) => warn!("Error from client {client_id}: {e:#}"),
                }
            });
        }

        info!("Stopped accepting connections");
        drop(accept_token);
    })
}

/// Pauses after a failed accept so persistent errors (e.g. out of file
/// descriptors) don't spin. Returns `false` if the server should stop.
async fn back_off(stop: &DerivedToken) -> bool {
    select! {
        _ = sleep(ACCEPT_BACKOFF) => true,
        _ = stop.cancelled() => false,
    }
}

pub trait ConnectionHandler: Clone + Send + Sync + 'static {
    /// Serves one client. `shutdown` is held for the whole connection and
    /// dropped when the returned future completes.
    fn handle_connection(
        &self,
        stream: TcpStream,
        shutdown: ShutdownToken,
        client_id: u64,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}
