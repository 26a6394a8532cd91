//! Process signals that stop the master.

use std::fmt;
use std::io;

/// The signal that asked the master to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopSignal::Interrupt if cfg!(unix) => "SIGINT",
            StopSignal::Interrupt => "Ctrl+C",
            StopSignal::Terminate => "SIGTERM",
        };
        f.write_str(name)
    }
}

/// Resolves with the first stop signal the process receives.
#[cfg(unix)]
pub async fn next_stop_signal() -> io::Result<StopSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::select! {
        _ = interrupt.recv() => StopSignal::Interrupt,
        _ = terminate.recv() => StopSignal::Terminate,
    })
}

/// Resolves with the first stop signal the process receives.
#[cfg(not(unix))]
pub async fn next_stop_signal() -> io::Result<StopSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(StopSignal::Interrupt)
}
