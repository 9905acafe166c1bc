use anyhow::Context;
use log::debug;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    select,
};

use crate::{server::ConnectionHandler, shutdown::ShutdownToken};

/// Sends every byte back until the client hangs up or shutdown begins.
#[derive(Clone, Copy, Debug, Default)]
pub struct Echo;

impl ConnectionHandler for Echo {
    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        shutdown: ShutdownToken,
        client_id: u64,
    ) -> anyhow::Result<()> {
        let mut buf = vec![0; 2048];

        loop {
            let bytes = select! {
                bytes = stream.read(&mut buf) => bytes.context("reading from client")?,
                _ = shutdown.wait_for_shutdown() => break,
            };

            if bytes == 0 {
                break;
            }

            debug!("Client {client_id} sent: {:?}", &buf[..bytes]);
            stream
                .write_all(&buf[..bytes])
                .await
                .context("writing to client")?;
        }

        Ok(())
    }
}
