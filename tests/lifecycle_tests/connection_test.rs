use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use drydock::{
    event::{logger::MockOperationLogger, Channel, OperationLogger, TracingLogger},
    provider::{
        hook_fn, ConnectionEditor, ConnectionFactory, ConnectionLifecycle, ConnectionParams,
        ConnectionRef, ConnectionStatus, ContainerConnection, HookResult, LifecycleHook,
        LifecycleMethod, ProviderDescriptor, ProviderError, ProviderId, ProviderRegistry,
    },
    CancellationToken, Disposable,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::registry;

struct BoomFactory;

#[async_trait]
impl ConnectionFactory for BoomFactory {
    async fn create(
        &self,
        _params: ConnectionParams,
        _logger: Arc<dyn OperationLogger>,
        _token: CancellationToken,
    ) -> HookResult<()> {
        anyhow::bail!("boom")
    }
}

/// Registers whatever connection the params describe, like a machine creation wizard.
struct MachineFactory {
    registry: ProviderRegistry,
    provider_id: ProviderId,
    created: Mutex<Vec<Disposable>>,
}

#[async_trait]
impl ConnectionFactory for MachineFactory {
    async fn create(
        &self,
        params: ConnectionParams,
        logger: Arc<dyn OperationLogger>,
        _token: CancellationToken,
    ) -> HookResult<()> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing name"))?;
        logger.log(&format!("creating machine {}", name));

        let lifecycle = ConnectionLifecycle::default()
            .with_start(hook_fn(|_| async { Ok(()) }))
            .with_stop(hook_fn(|_| async { Ok(()) }))
            .with_delete(hook_fn(|_| async { Ok(()) }));
        let connection = ContainerConnection::new(name, format!("unix:///run/{}.sock", name))
            .with_status(ConnectionStatus::Stopped)
            .with_lifecycle(lifecycle);
        let handle = self
            .registry
            .register_container_connection(self.provider_id, connection)?;
        self.created.lock().unwrap().push(handle);
        Ok(())
    }
}

struct WaitForCancel;

#[async_trait]
impl ConnectionFactory for WaitForCancel {
    async fn create(
        &self,
        _params: ConnectionParams,
        _logger: Arc<dyn OperationLogger>,
        token: CancellationToken,
    ) -> HookResult<()> {
        token.cancelled().await;
        anyhow::bail!("creation cancelled")
    }
}

struct RejectingEditor;

#[async_trait]
impl ConnectionEditor for RejectingEditor {
    async fn edit(
        &self,
        _params: ConnectionParams,
        _logger: Arc<dyn OperationLogger>,
        _token: CancellationToken,
    ) -> HookResult<()> {
        anyhow::bail!("disk size cannot shrink")
    }
}

/// Waits until the edit is cancelled, then stores how many cpus were asked for.
struct PatientEditor {
    applied: Mutex<Option<u64>>,
}

#[async_trait]
impl ConnectionEditor for PatientEditor {
    async fn edit(
        &self,
        params: ConnectionParams,
        _logger: Arc<dyn OperationLogger>,
        token: CancellationToken,
    ) -> HookResult<()> {
        token.cancelled().await;
        let cpus = params.get("cpus").and_then(|v| v.as_u64());
        *self.applied.lock().unwrap() = cpus;
        Ok(())
    }
}

fn quiet_logger() -> Arc<dyn OperationLogger> {
    Arc::new(TracingLogger::new("connection-test"))
}

/// Expects exactly one error line and exactly one end, whatever else is logged.
fn ends_once_logger() -> Arc<dyn OperationLogger> {
    let mut logger = MockOperationLogger::new();
    logger.expect_log().returning(|_| ());
    logger.expect_warn().returning(|_| ());
    logger.expect_error().times(1).returning(|_| ());
    logger.expect_end().times(1).returning(|| ());
    Arc::new(logger)
}

fn failing() -> Arc<dyn LifecycleHook> {
    hook_fn(|_| async { Err(anyhow::anyhow!("engine refused")) })
}

/// Registers a provider holding one container connection with the given lifecycle.
fn with_machine(registry: &ProviderRegistry, lifecycle: ConnectionLifecycle) -> (ProviderId, ConnectionRef) {
    let (id, _handle) = registry.register(ProviderDescriptor::new("podman", "Podman")).unwrap();
    registry
        .register_container_connection(
            id,
            ContainerConnection::new("machine", "unix:///machine.sock")
                .with_status(ConnectionStatus::Stopped)
                .with_lifecycle(lifecycle),
        )
        .unwrap();
    (id, ConnectionRef::container("machine", "unix:///machine.sock"))
}

#[tokio::test]
async fn test_failing_factory_ends_logger_once() {
    let registry = registry();
    let (id, _handle) = registry
        .register(ProviderDescriptor::new("p", "P").with_container_factory(Arc::new(BoomFactory)))
        .unwrap();

    let mut logger = MockOperationLogger::new();
    logger.expect_log().returning(|_| ());
    logger.expect_warn().returning(|_| ());
    logger.expect_error().times(1).returning(|_| ());
    logger.expect_end().times(1).returning(|| ());

    let err = registry
        .create_container_provider_connection(id, HashMap::new(), Arc::new(logger), None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("boom"));
    assert!(matches!(err, ProviderError::OperationFailed { .. }));
}

#[tokio::test]
async fn test_missing_factory_still_ends_logger() {
    let registry = registry();
    let (id, _handle) = registry.register(ProviderDescriptor::new("p", "P")).unwrap();

    let mut logger = MockOperationLogger::new();
    logger.expect_log().returning(|_| ());
    logger.expect_warn().returning(|_| ());
    logger.expect_error().returning(|_| ());
    logger.expect_end().times(1).returning(|| ());

    let err = registry
        .create_kubernetes_provider_connection(id, HashMap::new(), Arc::new(logger), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::MissingCapability { .. }));
}

#[tokio::test]
async fn test_created_connection_goes_through_lifecycle() {
    let registry = registry();
    let (id, _handle) = registry.register(ProviderDescriptor::new("podman", "Podman")).unwrap();
    let factory = Arc::new(MachineFactory {
        registry: registry.clone(),
        provider_id: id,
        created: Mutex::new(vec![]),
    });
    let _factory = registry
        .register_container_connection_factory(id, factory.clone())
        .unwrap();

    let statuses = Arc::new(Mutex::new(vec![]));
    let sink = statuses.clone();
    let _watch = registry.event_bus().receive(
        Channel::ContainerConnectionStatusUpdated.as_ref(),
        move |payload| {
            let status = payload["provider"]["containerConnections"][0]["status"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            sink.lock().unwrap().push(status);
        },
    );

    let params: ConnectionParams = [("name".to_string(), json!("machine-1"))].into();
    registry
        .create_container_provider_connection(id, params, quiet_logger(), None)
        .await
        .unwrap();

    let (owner, info) = registry
        .find_connection_by_endpoint("unix:///run/machine-1.sock")
        .unwrap();
    assert_eq!(owner, id);
    assert_eq!(info.status(), ConnectionStatus::Stopped);

    let connection = ConnectionRef::container("machine-1", "");
    registry
        .start_provider_connection(id, &connection, quiet_logger())
        .await
        .unwrap();
    assert_eq!(
        registry.get_provider_info(id).unwrap().container_connections[0].status,
        ConnectionStatus::Started
    );
    registry
        .stop_provider_connection(id, &connection, quiet_logger())
        .await
        .unwrap();
    assert_eq!(
        *statuses.lock().unwrap(),
        vec!["starting", "started", "stopping", "stopped"]
    );

    let err = registry
        .edit_provider_connection(id, &connection, HashMap::new(), quiet_logger(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::UnsupportedLifecycleMethod {
            method: LifecycleMethod::Edit,
            ..
        }
    ));

    registry
        .delete_provider_connection(id, &connection, quiet_logger())
        .await
        .unwrap();
    assert!(registry
        .find_connection_by_endpoint("unix:///run/machine-1.sock")
        .is_none());
    assert!(registry.get_provider_info(id).unwrap().container_connections.is_empty());
}

#[tokio::test]
async fn test_creation_observes_cancellation() {
    let registry = registry();
    let (id, _handle) = registry
        .register(ProviderDescriptor::new("kind", "Kind").with_kubernetes_factory(Arc::new(WaitForCancel)))
        .unwrap();
    let token_id = registry.tokens().create();

    let task = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .create_kubernetes_provider_connection(id, HashMap::new(), quiet_logger(), Some(token_id))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(registry.tokens().cancel(token_id));

    let err = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("creation cancelled"));
}

#[tokio::test]
async fn test_unregister_announces_connections_before_provider() {
    let registry = registry();
    let (id, handle) = registry.register(ProviderDescriptor::new("podman", "Podman")).unwrap();
    registry
        .register_container_connection(id, ContainerConnection::new("a", "unix:///a.sock"))
        .unwrap();

    let order = Arc::new(Mutex::new(vec![]));
    let handles: Vec<Disposable> = [
        Channel::ProviderUnregisterContainerConnection,
        Channel::ProviderDelete,
    ]
    .into_iter()
    .map(|channel| {
        let order = order.clone();
        registry
            .event_bus()
            .receive(channel.as_ref(), move |_| order.lock().unwrap().push(channel))
    })
    .collect();

    handle.dispose();

    assert_eq!(
        *order.lock().unwrap(),
        vec![
            Channel::ProviderUnregisterContainerConnection,
            Channel::ProviderDelete
        ]
    );
    assert!(registry.find_connection_by_endpoint("unix:///a.sock").is_none());
    drop(handles);
}

#[tokio::test]
async fn test_failing_connection_start_ends_logger_once() {
    let registry = registry();
    let (id, machine) = with_machine(&registry, ConnectionLifecycle::default().with_start(failing()));

    let err = registry
        .start_provider_connection(id, &machine, ends_once_logger())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("engine refused"));
    assert_eq!(
        registry.get_provider_info(id).unwrap().container_connections[0].status,
        ConnectionStatus::Stopped
    );
}

#[tokio::test]
async fn test_failing_connection_stop_ends_logger_once() {
    let registry = registry();
    let (id, machine) = with_machine(&registry, ConnectionLifecycle::default().with_stop(failing()));

    let err = registry
        .stop_provider_connection(id, &machine, ends_once_logger())
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::OperationFailed { .. }));
}

#[tokio::test]
async fn test_failing_connection_delete_ends_logger_once() {
    let registry = registry();
    let (id, machine) = with_machine(&registry, ConnectionLifecycle::default().with_delete(failing()));

    let err = registry
        .delete_provider_connection(id, &machine, ends_once_logger())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("engine refused"));
    assert!(registry.find_connection_by_endpoint("unix:///machine.sock").is_some());
}

#[tokio::test]
async fn test_failing_connection_edit_ends_logger_once() {
    let registry = registry();
    let (id, machine) = with_machine(
        &registry,
        ConnectionLifecycle::default().with_edit(Arc::new(RejectingEditor)),
    );

    let err = registry
        .edit_provider_connection(id, &machine, HashMap::new(), ends_once_logger(), None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("disk size cannot shrink"));
}

#[tokio::test]
async fn test_edit_receives_cancellation_token() {
    let registry = registry();
    let editor = Arc::new(PatientEditor {
        applied: Mutex::new(None),
    });
    let (id, machine) = with_machine(&registry, ConnectionLifecycle::default().with_edit(editor.clone()));
    let token_id = registry.tokens().create();

    let mut logger = MockOperationLogger::new();
    logger.expect_log().returning(|_| ());
    logger.expect_warn().returning(|_| ());
    logger.expect_error().never();
    logger.expect_end().times(1).returning(|| ());

    let task = {
        let registry = registry.clone();
        let params: ConnectionParams = [("cpus".to_string(), json!(4))].into();
        tokio::spawn(async move {
            registry
                .edit_provider_connection(id, &machine, params, Arc::new(logger), Some(token_id))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(registry.tokens().cancel(token_id));

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(*editor.applied.lock().unwrap(), Some(4));
}
