use std::fmt;

use tokio::{spawn, sync::mpsc};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("interrupt"),
            Signal::Terminate => f.write_str("terminate"),
        }
    }
}

/// Forwards termination signals into the returned channel until the
/// receiver is dropped.
#[cfg(unix)]
pub fn listen() -> anyhow::Result<mpsc::Receiver<Signal>> {
    use anyhow::Context;
    use tokio::{
        select,
        signal::unix::{signal, SignalKind},
    };

    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let (tx, rx) = mpsc::channel(4);

    spawn(async move {
        loop {
            let sig = select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = terminate.recv() => Signal::Terminate,
                _ = tx.closed() => break,
                else => break,
            };
            if tx.send(sig).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

#[cfg(not(unix))]
pub fn listen() -> anyhow::Result<mpsc::Receiver<Signal>> {
    let (tx, rx) = mpsc::channel(4);

    spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(Signal::Interrupt).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
