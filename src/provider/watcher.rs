//! Periodic connection status refresh.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::registry::ProviderRegistry;

/// Polls every connection's status probe on a fixed interval until cancelled.
pub struct StatusWatcher {
    registry: ProviderRegistry,
    interval: Duration,
    shutdown: CancellationToken,
}

impl StatusWatcher {
    pub fn new(registry: ProviderRegistry, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token stopping the loop; cancel it to shut the watcher down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval_ms = self.interval.as_millis() as u64, "status watcher started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let changed = self.registry.refresh_connection_statuses().await;
                    if changed > 0 {
                        trace!(changed, "connection statuses refreshed");
                    }
                }
            }
        }
        debug!("status watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationTokenRegistry;
    use crate::event::EventBus;
    use crate::provider::hooks::{ConnectionStatusProbe, KubernetesConnection, ProviderDescriptor};
    use crate::provider::types::ConnectionStatus;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Running;

    #[async_trait]
    impl ConnectionStatusProbe for Running {
        async fn status(&self) -> ConnectionStatus {
            ConnectionStatus::Started
        }
    }

    #[tokio::test]
    async fn test_watcher_refreshes_until_cancelled() {
        let registry = ProviderRegistry::new(
            Arc::new(EventBus::new(16)),
            Arc::new(CancellationTokenRegistry::new()),
        );
        let (id, _h) = registry
            .register(ProviderDescriptor::new("kind", "Kind"))
            .unwrap();
        let _c = registry
            .register_kubernetes_connection(
                id,
                KubernetesConnection::new("kind-cluster", "https://127.0.0.1:6443")
                    .with_probe(Arc::new(Running)),
            )
            .unwrap();

        let watcher = StatusWatcher::new(registry.clone(), Duration::from_millis(10));
        let shutdown = watcher.shutdown_token();
        let handle = watcher.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let info = registry.get_provider_info(id).unwrap();
        assert_eq!(info.kubernetes_connections[0].status, ConnectionStatus::Started);
    }
}
