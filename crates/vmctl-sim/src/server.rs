// vmctl-sim/src/server.rs
// TCP server for the simulated management endpoint
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info};
use vmctl_common::SimConfig;

use crate::collector::PropertyCollectorService;
use crate::handler::Handler;

/// Endpoint server that accepts client connections and runs tasks
pub struct Endpoint {
    /// Endpoint configuration
    config: Arc<SimConfig>,
}

impl Endpoint {
    /// Create a new Endpoint instance
    pub fn new(config: SimConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run the endpoint server - blocks until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.config.listen_addr))?;

        let handler = Handler::new(self.config.clone());
        self.serve(listener, handler).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener, handler: Handler) -> Result<()> {
        // Notify systemd that the endpoint is ready
        #[cfg(target_os = "linux")]
        {
            if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
                info!("Failed to notify systemd: {}", e);
            } else {
                info!("Notified systemd of ready state");
            }
        }

        info!(
            "vmctl-sim listening on {}",
            listener.local_addr().context("Failed to read listener address")?
        );

        // Spawn task cleanup
        let collector = handler.collector();
        let retention = chrono::Duration::seconds(self.config.task_retention_secs as i64);
        tokio::spawn(async move {
            monitor_tasks(collector, retention).await;
        });

        let mut join_set = JoinSet::new();

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler_clone = handler.clone();
                    join_set.spawn(async move {
                        if let Err(e) = handler_clone.handle_connection(stream).await {
                            error!("Error handling connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    // Small delay before retry
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }

            // Clean up completed connections
            while let Some(result) = join_set.try_join_next() {
                if let Err(e) = result {
                    error!("Error in connection handler task: {}", e);
                }
            }
        }
    }
}

/// Background task that drops completed tasks past their retention window
async fn monitor_tasks(collector: Arc<PropertyCollectorService>, retention: chrono::Duration) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        interval.tick().await;

        let pruned = collector.prune_completed(retention).await;
        if pruned > 0 {
            info!(
                "Task cleanup removed {} completed task(s), {} filter(s) active",
                pruned,
                collector.filter_count().await
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use vmctl_common::{Envelope, Request, Response};

    #[test]
    fn test_endpoint_new() {
        let config = SimConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..SimConfig::default()
        };

        let endpoint = Endpoint::new(config.clone());
        assert_eq!(endpoint.config.listen_addr, config.listen_addr);
    }

    #[tokio::test]
    async fn test_serve_answers_about() {
        let config = SimConfig::default();
        let endpoint = Endpoint::new(config.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Handler::new(Arc::new(config));
        tokio::spawn(async move {
            let _ = endpoint.serve(listener, handler).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = serde_json::to_vec(&Envelope::new(None, Request::About)).unwrap();
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut buf = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut buf).await.unwrap();

        let response: Response = serde_json::from_slice(&buf).unwrap();
        let data = response.into_result().unwrap();
        assert_eq!(data["name"], "vmctl-sim");
        assert_eq!(data["vm_count"], 2);
    }
}
