//! Operator console.
//!
//! Reads one command per line and prints the result through the log. The
//! console ends on `shutdown`, on end of input, or when the server stops.

use fleet_master::{execute, CloudContext};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// What the console does after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// Runs one command line.
pub async fn handle_line(ctx: &CloudContext, line: &str) -> Flow {
    let line = line.trim();
    if line.eq_ignore_ascii_case("shutdown") || line.eq_ignore_ascii_case("stop") {
        return Flow::Shutdown;
    }
    match execute(ctx, line).await {
        Ok(lines) => {
            for line in lines {
                info!("{}", line);
            }
        }
        Err(e) => warn!("{}", e),
    }
    Flow::Continue
}

/// Reads commands from `input` until shutdown is requested or the input ends.
///
/// A `shutdown` command is forwarded to `shutdown`.
pub async fn run<R>(ctx: Arc<CloudContext>, input: R, shutdown: broadcast::Sender<()>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut stopped = shutdown.subscribe();
    info!("⌨️ Console ready, type 'help' for a list of commands");

    loop {
        tokio::select! {
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if handle_line(&ctx, &line).await == Flow::Shutdown {
                        info!("🛑 Shutdown requested from console");
                        let _ = shutdown.send(());
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Console input failed: {}", e);
                    break;
                }
            },
            _ = stopped.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_master::{MasterConfig, MemoryGateway};
    use tokio::io::BufReader;

    fn context() -> Arc<CloudContext> {
        CloudContext::new(MasterConfig::default(), Arc::new(MemoryGateway::new())).unwrap()
    }

    #[tokio::test]
    async fn test_commands_are_executed_until_shutdown() {
        let ctx = context();
        let (shutdown, mut signalled) = broadcast::channel(1);
        let input = BufReader::new(
            &b"group create lobby 512 false 1.20\n\nshutdown\ngroup create late 512 false 1.20\n"[..],
        );

        run(Arc::clone(&ctx), input, shutdown).await;

        assert!(ctx.groups.contains("lobby"));
        assert!(!ctx.groups.contains("late"));
        assert!(signalled.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_end_of_input_does_not_signal_shutdown() {
        let ctx = context();
        let (shutdown, mut signalled) = broadcast::channel(1);

        run(ctx, BufReader::new(&b"help\n"[..]), shutdown).await;

        assert!(signalled.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_commands_keep_the_console_running() {
        let ctx = context();
        assert_eq!(handle_line(&ctx, "group edit ghost memory 5").await, Flow::Continue);
        assert_eq!(handle_line(&ctx, "  STOP ").await, Flow::Shutdown);
    }
}
