pub mod hooks;
pub mod registry;
pub mod types;
pub mod watcher;

pub use hooks::{
    hook_fn, CheckResult, CleanupAction, CleanupProvider, ConnectionEditor, ConnectionFactory,
    ConnectionLifecycle, ConnectionStatusProbe, ContainerConnection, DocLink, HookResult,
    KubernetesConnection, LifecycleHook, PreflightCallback, PreflightCheck, ProviderDescriptor,
    ProviderHooks, ProviderInstaller, ProviderLifecycle, ProviderUpdater,
};
pub use registry::{CleanupActionNames, CleanupOutcome, CleanupReport, ProviderRegistry};
pub use types::{
    ConnectionInfo, ConnectionKind, ConnectionParams, ConnectionRef, ConnectionStatus,
    ContainerConnectionInfo, ContainerEngineType, DetectionCheck, HookKind,
    KubernetesConnectionInfo, LifecycleMethod, LifecycleMethods, Operation, ProviderCapabilities,
    ProviderError, ProviderEvent, ProviderId, ProviderInfo, ProviderResult, ProviderStatus,
    ProviderWarning,
};
pub use watcher::StatusWatcher;
