use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cancellation::CancellationTokenRegistry,
    config::SystemConfig,
    control::ControlPlane,
    diagnostic::DiagnosticRegistry,
    event::EventBus,
    provider::{ProviderRegistry, StatusWatcher},
    tray::TrayMenu,
    InternalResult,
};

struct Watcher {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Process-wide composition root. Constructs one of each registry and hands out
/// shared references; nothing in the crate is a global.
pub struct System {
    config: SystemConfig,
    event_bus: Arc<EventBus>,
    tokens: Arc<CancellationTokenRegistry>,
    diagnostics: Arc<DiagnosticRegistry>,
    providers: ProviderRegistry,
    tray: TrayMenu,
    control: Arc<ControlPlane>,
    watcher: Mutex<Option<Watcher>>,
}

impl System {
    pub fn new(config: SystemConfig) -> InternalResult<Self> {
        config.validate()?;
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let tokens = Arc::new(CancellationTokenRegistry::new());
        let providers = ProviderRegistry::new(event_bus.clone(), tokens.clone())
            .with_parallel_cleanup(config.parallel_cleanup);
        let tray = TrayMenu::attach(&providers);
        let control = Arc::new(ControlPlane::new(providers.clone()));
        debug!("system constructed");

        Ok(Self {
            config,
            event_bus,
            tokens,
            diagnostics: Arc::new(DiagnosticRegistry::new()),
            providers,
            tray,
            control,
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn tokens(&self) -> &Arc<CancellationTokenRegistry> {
        &self.tokens
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticRegistry> {
        &self.diagnostics
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn tray(&self) -> &TrayMenu {
        &self.tray
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    /// Marks the backend ready and starts the status watcher when enabled.
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) {
        self.event_bus.mark_backend_ready();
        if !self.config.status_refresh.enabled {
            info!("system started, status refresh disabled");
            return;
        }

        let mut watcher = self.lock_watcher();
        if watcher.is_some() {
            warn!("system already started");
            return;
        }
        let status_watcher =
            StatusWatcher::new(self.providers.clone(), self.config.status_refresh.interval);
        let shutdown = status_watcher.shutdown_token();
        *watcher = Some(Watcher {
            shutdown,
            handle: status_watcher.spawn(),
        });
        info!("system started");
    }

    /// Stops background work. Registered providers stay registered.
    pub async fn shutdown(&self) -> InternalResult<()> {
        let watcher = self.lock_watcher().take();
        if let Some(watcher) = watcher {
            watcher.shutdown.cancel();
            watcher
                .handle
                .await
                .map_err(|e| crate::Error::internal(format!("status watcher failed: {}", e)))?;
        }
        self.tray.detach();
        info!("system shut down");
        Ok(())
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<Watcher>> {
        match self.watcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut config = SystemConfig::default();
        config.status_refresh.interval = Duration::from_millis(10);
        let system = System::new(config).unwrap();

        system.start();
        system.start();
        assert!(system.event_bus().is_backend_ready());

        system.shutdown().await.unwrap();
        system.shutdown().await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SystemConfig {
            event_buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            System::new(config),
            Err(crate::Error::Config(ConfigError::Invalid(_)))
        ));
    }
}
