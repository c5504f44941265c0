use std::{sync::Arc, time::Duration};

use drydock::{
    control::ControlRequest,
    event::{ChannelSurface, TracingLogger},
    provider::{
        hook_fn, ConnectionStatus, ConnectionStatusProbe, ContainerConnection, ProviderDescriptor,
        ProviderLifecycle, ProviderStatus,
    },
    system::System,
    tray::GlobalStatus,
    Channel, SystemConfig,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

struct AlwaysStarted;

#[async_trait]
impl ConnectionStatusProbe for AlwaysStarted {
    async fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Started
    }
}

fn config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.status_refresh.interval = Duration::from_millis(10);
    config
}

#[tokio::test]
async fn test_events_reach_surface_in_order_after_handshake() {
    let system = System::new(config()).unwrap();
    let bus = system.event_bus();
    let (surface, mut received) = ChannelSurface::new();
    bus.attach_surface(Arc::new(surface));

    bus.send("x", json!(1));
    bus.send("x", json!(2));
    assert!(received.try_recv().is_err());

    system.start();
    bus.mark_surface_ready();

    assert_eq!(received.try_recv().unwrap().payload, json!(1));
    assert_eq!(received.try_recv().unwrap().payload, json!(2));

    let rest: Vec<String> = std::iter::from_fn(|| received.try_recv().ok())
        .map(|message| message.channel)
        .collect();
    assert!(!rest.iter().any(|channel| channel == "x"));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tray_follows_provider_lifecycle() {
    let system = System::new(config()).unwrap();
    let registry = system.providers();
    let lifecycle = ProviderLifecycle::default()
        .with_start(hook_fn(|_| async { Ok(()) }))
        .with_stop(hook_fn(|_| async { Ok(()) }));
    let (id, handle) = registry
        .register(
            ProviderDescriptor::new("podman", "Podman")
                .with_status(ProviderStatus::Configured)
                .with_lifecycle(lifecycle),
        )
        .unwrap();
    assert_eq!(system.tray().global_status(), GlobalStatus::Initialized);

    registry
        .start_provider(id, Arc::new(TracingLogger::new("start")))
        .await
        .unwrap();
    assert_eq!(system.tray().global_status(), GlobalStatus::Ready);

    registry
        .stop_provider(id, Arc::new(TracingLogger::new("stop")))
        .await
        .unwrap();
    assert_eq!(system.tray().global_status(), GlobalStatus::Initialized);

    handle.dispose();
    assert!(system.tray().items().is_empty());
}

#[tokio::test]
async fn test_watcher_refreshes_probed_connections() {
    let system = System::new(config()).unwrap();
    let registry = system.providers();
    let (id, _handle) = registry.register(ProviderDescriptor::new("podman", "Podman")).unwrap();
    registry
        .register_container_connection(
            id,
            ContainerConnection::new("machine", "unix:///machine.sock")
                .with_status(ConnectionStatus::Stopped)
                .with_probe(Arc::new(AlwaysStarted)),
        )
        .unwrap();

    system.start();
    let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let info = registry.get_provider_info(id).unwrap();
            if info.container_connections[0].status == ConnectionStatus::Started {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    system.shutdown().await.unwrap();

    assert!(refreshed.is_ok());
    assert_eq!(system.tray().global_status(), GlobalStatus::Ready);
}

#[tokio::test]
async fn test_control_plane_lists_providers() {
    let system = System::new(config()).unwrap();
    system
        .providers()
        .register(ProviderDescriptor::new("kind", "Kind").with_status(ProviderStatus::Installed))
        .unwrap();

    let value = system
        .control()
        .dispatch(ControlRequest::GetProviderInfos)
        .await
        .unwrap();

    assert_eq!(value[0]["id"], "kind");
    assert_eq!(value[0]["status"], "installed");

    let mut subscriber = system.event_bus().subscribe();
    system.event_bus().send(Channel::ExtensionsStarted.as_ref(), json!(true));
    let event = subscriber.recv().await.unwrap();
    assert_eq!(event.channel, "extensions-started");
}
