use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventError;

/// Process-lifetime unique identifier assigned at registration. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub u64);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider status.
///
/// Registry operations only produce these edges:
///
/// ```text
/// not-installed        -> installed | configuring | error
/// installed|configured -> configuring | ready | starting | error
/// starting             -> started | error
/// started              -> stopping | error
/// stopping             -> stopped | error
/// any                  -> unknown
/// ```
///
/// The edges are guidance for hook authors; [`crate::provider::ProviderRegistry::update_status`]
/// accepts any value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProviderStatus {
    NotInstalled,
    Installed,
    Configuring,
    Configured,
    Ready,
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
    #[default]
    Unknown,
}

impl ProviderStatus {
    pub fn is_transitional(&self) -> bool {
        matches!(self, ProviderStatus::Starting | ProviderStatus::Stopping)
    }
}

/// Connection status; a connection cannot be installed or configured.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionStatus {
    Started,
    Stopped,
    Starting,
    Stopping,
    #[default]
    Unknown,
}

impl ConnectionStatus {
    pub fn is_transitional(&self) -> bool {
        matches!(self, ConnectionStatus::Starting | ConnectionStatus::Stopping)
    }
}

impl From<ConnectionStatus> for ProviderStatus {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Started => ProviderStatus::Started,
            ConnectionStatus::Stopped => ProviderStatus::Stopped,
            ConnectionStatus::Starting => ProviderStatus::Starting,
            ConnectionStatus::Stopping => ProviderStatus::Stopping,
            ConnectionStatus::Unknown => ProviderStatus::Unknown,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleMethod {
    Start,
    Stop,
    Delete,
    Edit,
}

/// Lifecycle operations a connection declares. Computed once from the hooks supplied
/// at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LifecycleMethods {
    methods: BTreeSet<LifecycleMethod>,
}

impl From<Vec<LifecycleMethod>> for LifecycleMethods {
    fn from(methods: Vec<LifecycleMethod>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
        }
    }
}

impl LifecycleMethods {
    pub fn supports(&self, method: LifecycleMethod) -> bool {
        self.methods.contains(&method)
    }

    pub fn list(&self) -> Vec<LifecycleMethod> {
        self.methods.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Which optional hooks a provider currently has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    pub install: bool,
    pub update: bool,
    pub autostart: bool,
    pub cleanup: bool,
    pub initialize: bool,
    pub start: bool,
    pub stop: bool,
    pub container_connection_creation: bool,
    pub kubernetes_connection_creation: bool,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContainerEngineType {
    #[default]
    Podman,
    Docker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionKind {
    Container,
    Kubernetes,
}

/// Identifies a connection within a provider. The endpoint is tried first, the name second.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionRef {
    pub kind: ConnectionKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
}

impl ConnectionRef {
    pub fn container(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            kind: ConnectionKind::Container,
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn kubernetes(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            kind: ConnectionKind::Kubernetes,
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} connection '{}' ({})", self.kind, self.name, self.endpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConnectionInfo {
    pub name: String,
    pub display_name: String,
    /// Socket path of the engine API.
    pub endpoint: String,
    pub engine_type: ContainerEngineType,
    pub status: ConnectionStatus,
    pub lifecycle_methods: LifecycleMethods,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConnectionInfo {
    pub name: String,
    /// Cluster API URL.
    pub endpoint: String,
    pub status: ConnectionStatus,
    pub lifecycle_methods: LifecycleMethods,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionInfo {
    Container(ContainerConnectionInfo),
    Kubernetes(KubernetesConnectionInfo),
}

impl ConnectionInfo {
    pub fn name(&self) -> &str {
        match self {
            ConnectionInfo::Container(c) => &c.name,
            ConnectionInfo::Kubernetes(k) => &k.name,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ConnectionInfo::Container(c) => &c.endpoint,
            ConnectionInfo::Kubernetes(k) => &k.endpoint,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionInfo::Container(c) => c.status,
            ConnectionInfo::Kubernetes(k) => k.status,
        }
    }
}

/// Result of one detection check performed by the extension when it registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionCheck {
    pub name: String,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderWarning {
    pub name: String,
    pub details: String,
}

/// Immutable snapshot of a provider and its connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub internal_id: ProviderId,
    pub id: String,
    pub name: String,
    pub status: ProviderStatus,
    pub version: Option<String>,
    /// Target version when an update is available.
    pub update_version: Option<String>,
    pub detection_checks: Vec<DetectionCheck>,
    pub warnings: Vec<ProviderWarning>,
    pub capabilities: ProviderCapabilities,
    pub container_connections: Vec<ContainerConnectionInfo>,
    pub kubernetes_connections: Vec<KubernetesConnectionInfo>,
}

impl ProviderInfo {
    pub fn connection_statuses(&self) -> impl Iterator<Item = ConnectionStatus> + '_ {
        self.container_connections
            .iter()
            .map(|c| c.status)
            .chain(self.kubernetes_connections.iter().map(|k| k.status))
    }
}

/// Payload of every provider channel on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider: ProviderInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionRef>,
}

/// User supplied parameters for connection creation and edition.
pub type ConnectionParams = HashMap<String, serde_json::Value>;

/// Hook kinds a provider may register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum HookKind {
    #[strum(serialize = "installer")]
    Installer,
    #[strum(serialize = "updater")]
    Updater,
    #[strum(serialize = "lifecycle")]
    Lifecycle,
    #[strum(serialize = "autostart")]
    Autostart,
    #[strum(serialize = "cleanup")]
    Cleanup,
    #[strum(serialize = "container connection factory")]
    ContainerConnectionFactory,
    #[strum(serialize = "kubernetes connection factory")]
    KubernetesConnectionFactory,
}

/// Operations reported in [`ProviderError::OperationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    Install,
    Update,
    Initialize,
    Start,
    Stop,
    Autostart,
    CreateConnection,
    StartConnection,
    StopConnection,
    EditConnection,
    DeleteConnection,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid provider descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(ProviderId),

    #[error("Provider {provider_id} has no {connection}")]
    ConnectionNotFound {
        provider_id: ProviderId,
        connection: ConnectionRef,
    },

    #[error("Connection endpoint already registered: {0}")]
    DuplicateEndpoint(String),

    #[error("Provider {provider_id} already has a connection named {name}")]
    DuplicateConnectionName { provider_id: ProviderId, name: String },

    #[error("Provider {provider_id} already has a {hook}")]
    HookAlreadyRegistered { provider_id: ProviderId, hook: HookKind },

    #[error("Provider {provider_id} has no {hook}")]
    MissingCapability { provider_id: ProviderId, hook: HookKind },

    #[error("{connection} does not support {method}")]
    UnsupportedLifecycleMethod {
        connection: ConnectionRef,
        method: LifecycleMethod,
    },

    #[error("No update available for provider {0}")]
    NoUpdateAvailable(ProviderId),

    #[error("{operation} failed for {target}: {source:#}")]
    OperationFailed {
        operation: Operation,
        target: String,
        source: anyhow::Error,
    },

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(ProviderStatus::NotInstalled.to_string(), "not-installed");
        assert_eq!(
            serde_json::to_value(ProviderStatus::NotInstalled).unwrap(),
            json!("not-installed")
        );
        assert_eq!(
            ConnectionStatus::from_str("stopping").unwrap(),
            ConnectionStatus::Stopping
        );
    }

    #[test]
    fn test_lifecycle_methods_serialize_sorted() {
        let methods = LifecycleMethods::from(vec![
            LifecycleMethod::Edit,
            LifecycleMethod::Start,
            LifecycleMethod::Start,
        ]);
        assert!(methods.supports(LifecycleMethod::Start));
        assert!(!methods.supports(LifecycleMethod::Delete));
        assert_eq!(serde_json::to_value(&methods).unwrap(), json!(["start", "edit"]));
    }

    #[test]
    fn test_operation_failed_keeps_hook_message() {
        let err = ProviderError::OperationFailed {
            operation: Operation::CreateConnection,
            target: "provider 1".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.to_string(), "create-connection failed for provider 1: boom");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_connection_info_tagged() {
        let info = ConnectionInfo::Kubernetes(KubernetesConnectionInfo {
            name: "kind".to_string(),
            endpoint: "https://127.0.0.1:6443".to_string(),
            status: ConnectionStatus::Started,
            lifecycle_methods: LifecycleMethods::default(),
        });
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["kind"], json!("kubernetes"));
        assert_eq!(info.endpoint(), "https://127.0.0.1:6443");
    }
}
