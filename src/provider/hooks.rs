//! # Provider hooks
//!
//! Extension code drives engines; the registry only orchestrates. Everything an
//! extension plugs in is one of the traits below, held by the registry as
//! `Arc<dyn ...>`.
//!
//! Hooks receive an [`OperationLogger`] for progress and, where the operation can run
//! long, a [`CancellationToken`]. Cancellation is cooperative: a hook that observes a
//! cancelled token should return promptly, normally with `Ok`, and the caller reads
//! "did not finish" from its own state rather than from an error.
//!
//! Optional provider lifecycle verbs are separate `Option` slots rather than trait
//! methods with defaults, so the registry knows up front which verbs exist.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use super::types::{
    ConnectionParams, ConnectionStatus, ContainerEngineType, DetectionCheck, LifecycleMethod,
    LifecycleMethods, ProviderCapabilities, ProviderStatus, ProviderWarning,
};
use crate::cancellation::CancellationToken;
use crate::event::OperationLogger;

/// Failure reported by extension code.
pub type HookResult<T> = anyhow::Result<T>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocLink {
    pub title: String,
    pub url: String,
}

/// Outcome of a single preflight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc_links: Vec<DocLink>,
}

impl CheckResult {
    pub fn passed() -> Self {
        Self {
            successful: true,
            description: None,
            doc_links: vec![],
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            successful: false,
            description: Some(description.into()),
            doc_links: vec![],
        }
    }

    pub fn with_doc_link(mut self, title: impl Into<String>, url: impl Into<String>) -> Self {
        self.doc_links.push(DocLink {
            title: title.into(),
            url: url.into(),
        });
        self
    }
}

/// A named validation run before install or update.
#[async_trait]
pub trait PreflightCheck: Send + Sync {
    fn title(&self) -> &str;

    async fn execute(&self) -> HookResult<CheckResult>;
}

/// Live progress of a preflight run.
#[automock]
pub trait PreflightCallback: Send + Sync {
    fn start_check(&self, title: &str);

    fn end_check(&self, title: &str, result: &CheckResult);
}

#[async_trait]
pub trait ProviderInstaller: Send + Sync {
    fn preflight_checks(&self) -> Vec<Arc<dyn PreflightCheck>> {
        vec![]
    }

    /// Installs the tool and reports the status the provider ends up in.
    async fn install(&self, logger: Arc<dyn OperationLogger>) -> HookResult<ProviderStatus>;
}

#[async_trait]
pub trait ProviderUpdater: Send + Sync {
    /// Version the update moves to.
    fn version(&self) -> String;

    fn preflight_checks(&self) -> Vec<Arc<dyn PreflightCheck>> {
        vec![]
    }

    async fn update(&self, logger: Arc<dyn OperationLogger>) -> HookResult<ProviderStatus>;
}

/// One lifecycle verb: provider initialize/start/stop/autostart, connection start/stop/delete.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn run(&self, logger: Arc<dyn OperationLogger>) -> HookResult<()>;
}

/// Edits a connection from user supplied parameters.
#[async_trait]
pub trait ConnectionEditor: Send + Sync {
    async fn edit(
        &self,
        params: ConnectionParams,
        logger: Arc<dyn OperationLogger>,
        token: CancellationToken,
    ) -> HookResult<()>;
}

/// Creates a connection from user supplied parameters.
///
/// The factory registers the resulting connection through the registry itself; the
/// registry never waits on it beyond the returned future.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        params: ConnectionParams,
        logger: Arc<dyn OperationLogger>,
        token: CancellationToken,
    ) -> HookResult<()>;
}

/// Reports the live status of a connection, typically by asking the engine.
#[async_trait]
pub trait ConnectionStatusProbe: Send + Sync {
    async fn status(&self) -> ConnectionStatus;
}

/// A named, independently executable cleanup unit.
#[async_trait]
pub trait CleanupAction: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        logger: Arc<dyn OperationLogger>,
        token: CancellationToken,
    ) -> HookResult<()>;
}

#[async_trait]
pub trait CleanupProvider: Send + Sync {
    async fn actions(&self) -> HookResult<Vec<Arc<dyn CleanupAction>>>;
}

/// Provider lifecycle verbs; each is optional.
#[derive(Clone, Default)]
pub struct ProviderLifecycle {
    pub initialize: Option<Arc<dyn LifecycleHook>>,
    pub start: Option<Arc<dyn LifecycleHook>>,
    pub stop: Option<Arc<dyn LifecycleHook>>,
}

impl ProviderLifecycle {
    pub fn with_initialize(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.initialize = Some(hook);
        self
    }

    pub fn with_start(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.start = Some(hook);
        self
    }

    pub fn with_stop(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.stop = Some(hook);
        self
    }
}

/// Every hook slot of a provider.
#[derive(Clone, Default)]
pub struct ProviderHooks {
    pub installer: Option<Arc<dyn ProviderInstaller>>,
    pub updater: Option<Arc<dyn ProviderUpdater>>,
    pub lifecycle: Option<ProviderLifecycle>,
    pub autostart: Option<Arc<dyn LifecycleHook>>,
    pub cleanup: Option<Arc<dyn CleanupProvider>>,
    pub container_factory: Option<Arc<dyn ConnectionFactory>>,
    pub kubernetes_factory: Option<Arc<dyn ConnectionFactory>>,
}

impl ProviderHooks {
    pub fn capabilities(&self) -> ProviderCapabilities {
        let lifecycle = self.lifecycle.as_ref();
        ProviderCapabilities {
            install: self.installer.is_some(),
            update: self.updater.is_some(),
            autostart: self.autostart.is_some(),
            cleanup: self.cleanup.is_some(),
            initialize: lifecycle.is_some_and(|l| l.initialize.is_some()),
            start: lifecycle.is_some_and(|l| l.start.is_some()),
            stop: lifecycle.is_some_and(|l| l.stop.is_some()),
            container_connection_creation: self.container_factory.is_some(),
            kubernetes_connection_creation: self.kubernetes_factory.is_some(),
        }
    }
}

/// Connection lifecycle verbs; the declared [`LifecycleMethods`] follow from which are set.
#[derive(Clone, Default)]
pub struct ConnectionLifecycle {
    pub start: Option<Arc<dyn LifecycleHook>>,
    pub stop: Option<Arc<dyn LifecycleHook>>,
    pub delete: Option<Arc<dyn LifecycleHook>>,
    pub edit: Option<Arc<dyn ConnectionEditor>>,
}

impl ConnectionLifecycle {
    pub fn with_start(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.start = Some(hook);
        self
    }

    pub fn with_stop(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.stop = Some(hook);
        self
    }

    pub fn with_delete(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.delete = Some(hook);
        self
    }

    pub fn with_edit(mut self, editor: Arc<dyn ConnectionEditor>) -> Self {
        self.edit = Some(editor);
        self
    }

    pub fn methods(&self) -> LifecycleMethods {
        let mut methods = vec![];
        if self.start.is_some() {
            methods.push(LifecycleMethod::Start);
        }
        if self.stop.is_some() {
            methods.push(LifecycleMethod::Stop);
        }
        if self.delete.is_some() {
            methods.push(LifecycleMethod::Delete);
        }
        if self.edit.is_some() {
            methods.push(LifecycleMethod::Edit);
        }
        LifecycleMethods::from(methods)
    }
}

/// A container engine connection offered by a provider.
#[derive(Clone)]
pub struct ContainerConnection {
    pub name: String,
    pub display_name: Option<String>,
    pub endpoint: String,
    pub engine_type: ContainerEngineType,
    pub status: ConnectionStatus,
    pub lifecycle: ConnectionLifecycle,
    pub probe: Option<Arc<dyn ConnectionStatusProbe>>,
}

impl ContainerConnection {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            endpoint: endpoint.into(),
            engine_type: ContainerEngineType::default(),
            status: ConnectionStatus::Unknown,
            lifecycle: ConnectionLifecycle::default(),
            probe: None,
        }
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_engine_type(mut self, engine_type: ContainerEngineType) -> Self {
        self.engine_type = engine_type;
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: ConnectionLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectionStatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// A Kubernetes cluster connection offered by a provider.
#[derive(Clone)]
pub struct KubernetesConnection {
    pub name: String,
    pub endpoint: String,
    pub status: ConnectionStatus,
    pub lifecycle: ConnectionLifecycle,
    pub probe: Option<Arc<dyn ConnectionStatusProbe>>,
}

impl KubernetesConnection {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            status: ConnectionStatus::Unknown,
            lifecycle: ConnectionLifecycle::default(),
            probe: None,
        }
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: ConnectionLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectionStatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// Everything an extension supplies when registering a provider.
#[derive(Clone, Default)]
pub struct ProviderDescriptor {
    /// Logical id, stable across restarts but not guaranteed unique.
    pub id: String,
    pub name: String,
    pub status: ProviderStatus,
    pub version: Option<String>,
    pub detection_checks: Vec<DetectionCheck>,
    pub warnings: Vec<ProviderWarning>,
    pub hooks: ProviderHooks,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ProviderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_detection_checks(mut self, checks: Vec<DetectionCheck>) -> Self {
        self.detection_checks = checks;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<ProviderWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn ProviderInstaller>) -> Self {
        self.hooks.installer = Some(installer);
        self
    }

    pub fn with_updater(mut self, updater: Arc<dyn ProviderUpdater>) -> Self {
        self.hooks.updater = Some(updater);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: ProviderLifecycle) -> Self {
        self.hooks.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_autostart(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.autostart = Some(hook);
        self
    }

    pub fn with_cleanup(mut self, cleanup: Arc<dyn CleanupProvider>) -> Self {
        self.hooks.cleanup = Some(cleanup);
        self
    }

    pub fn with_container_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.hooks.container_factory = Some(factory);
        self
    }

    pub fn with_kubernetes_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.hooks.kubernetes_factory = Some(factory);
        self
    }
}

/// [`LifecycleHook`] backed by an async closure.
pub struct FnHook<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> LifecycleHook for FnHook<F, Fut>
where
    F: Fn(Arc<dyn OperationLogger>) -> Fut + Send + Sync,
    Fut: Future<Output = HookResult<()>> + Send,
{
    async fn run(&self, logger: Arc<dyn OperationLogger>) -> HookResult<()> {
        (self.f)(logger).await
    }
}

/// Builds a lifecycle hook from an async closure.
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn LifecycleHook>
where
    F: Fn(Arc<dyn OperationLogger>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult<()>> + Send + 'static,
{
    Arc::new(FnHook {
        f,
        _fut: PhantomData,
    })
}
