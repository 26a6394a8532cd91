//! TCP front of the master.
//!
//! [`MasterServer`] accepts subordinate nodes on the configured bind address
//! and hands every connection to the protocol engine. Everything else happens
//! in packet handlers and the queue worker.

use crate::context::CloudContext;
use crate::error::ServerError;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

pub struct MasterServer {
    context: Arc<CloudContext>,
    shutdown_sender: broadcast::Sender<()>,
    // Held from construction so a shutdown sent before serving is not lost.
    shutdown_receiver: Mutex<Option<broadcast::Receiver<()>>>,
}

impl MasterServer {
    pub fn new(context: Arc<CloudContext>) -> Self {
        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        Self {
            context,
            shutdown_sender,
            shutdown_receiver: Mutex::new(Some(shutdown_receiver)),
        }
    }

    pub fn context(&self) -> &Arc<CloudContext> {
        &self.context
    }

    /// Binds the configured address and serves until shutdown is requested.
    pub async fn start(&self) -> Result<(), ServerError> {
        let address = self.context.config.bind_address;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {address}: {e}")))?;
        self.serve(listener).await
    }

    /// Serves nodes on an already bound listener until shutdown is requested.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Network(e.to_string()))?;
        info!("🚀 Master '{}' listening on {}", self.context.config.node_name, local);

        let mut shutdown_receiver = self
            .shutdown_receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.shutdown_sender.subscribe());
        let worker = self.context.queue.start();
        if self.context.queue.is_enabled() {
            info!("⚖️ Queue controller running");
            self.context.queue.trigger();
        } else {
            info!("⏸️ Queue controller disabled");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let _ = stream.set_nodelay(true);
                        self.context.engine.attach(stream, addr);
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("🧹 Closing {} node connection(s)...", self.context.engine.connection_count());
        self.context.engine.shutdown();
        if let Some(worker) = worker {
            worker.abort();
        }
        info!("Server stopped");
        Ok(())
    }

    /// Returns a sender that stops [`MasterServer::start`] when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterConfig;
    use crate::persistence::MemoryGateway;
    use crate::testing::RecordingLauncher;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn stops_on_shutdown_signal() {
        let ctx = CloudContext::with_launcher(
            MasterConfig::default(),
            Arc::new(MemoryGateway::new()),
            RecordingLauncher::new(),
        )
        .unwrap();
        let server = Arc::new(MasterServer::new(ctx));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };

        let _node = tokio::net::TcpStream::connect(addr).await.unwrap();
        for _ in 0..50 {
            if server.context().engine.connection_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.context().engine.connection_count(), 1);

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(server.context().engine.connection_count(), 0);
    }
}
