//! # Control plane
//!
//! Request/response channel between a UI surface and the orchestration core. A request
//! is a JSON object naming a `command` and carrying its `args`:
//!
//! ```json
//! {"command": "start-provider-connection",
//!  "args": {"providerId": 1, "connection": {"kind": "container", "endpoint": "/run/podman.sock"},
//!           "loggerKey": "task-42"}}
//! ```
//!
//! Commands map one to one onto [`ProviderRegistry`] operations. Operations taking a logger
//! stream to the bus through an [`EventLogger`] when the request names a `loggerKey`,
//! otherwise they log through `tracing`. The handshake commands (`mark-as-ready`,
//! `mark-as-extensions-started`, `surface-ready`) drive the readiness gate of the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::cancellation::CancellationTokenRegistry;
use crate::event::{Channel, EventBus, EventError, EventLogger, OperationLogger, TracingLogger};
use crate::provider::{
    CheckResult, ConnectionParams, ConnectionRef, PreflightCallback, ProviderError, ProviderId,
    ProviderRegistry, ProviderStatus,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(
    tag = "command",
    content = "args",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
#[strum(serialize_all = "kebab-case")]
pub enum ControlRequest {
    GetProviderInfos,
    GetProviderInfo {
        provider_id: ProviderId,
    },
    UpdateStatus {
        provider_id: ProviderId,
        status: ProviderStatus,
    },
    InstallProvider {
        provider_id: ProviderId,
        #[serde(default)]
        logger_key: Option<String>,
    },
    UpdateProvider {
        provider_id: ProviderId,
        #[serde(default)]
        logger_key: Option<String>,
    },
    RunPreflightChecks {
        provider_id: ProviderId,
        #[serde(default)]
        is_update: bool,
        #[serde(default)]
        logger_key: Option<String>,
    },
    StartProvider {
        provider_id: ProviderId,
        #[serde(default)]
        logger_key: Option<String>,
    },
    StopProvider {
        provider_id: ProviderId,
        #[serde(default)]
        logger_key: Option<String>,
    },
    InitializeProvider {
        provider_id: ProviderId,
        #[serde(default)]
        logger_key: Option<String>,
    },
    CreateContainerProviderConnection {
        provider_id: ProviderId,
        #[serde(default)]
        params: ConnectionParams,
        #[serde(default)]
        logger_key: Option<String>,
        #[serde(default)]
        token: Option<u64>,
    },
    CreateKubernetesProviderConnection {
        provider_id: ProviderId,
        #[serde(default)]
        params: ConnectionParams,
        #[serde(default)]
        logger_key: Option<String>,
        #[serde(default)]
        token: Option<u64>,
    },
    StartProviderConnection {
        provider_id: ProviderId,
        connection: ConnectionRef,
        #[serde(default)]
        logger_key: Option<String>,
    },
    StopProviderConnection {
        provider_id: ProviderId,
        connection: ConnectionRef,
        #[serde(default)]
        logger_key: Option<String>,
    },
    EditProviderConnection {
        provider_id: ProviderId,
        connection: ConnectionRef,
        #[serde(default)]
        params: ConnectionParams,
        #[serde(default)]
        logger_key: Option<String>,
        #[serde(default)]
        token: Option<u64>,
    },
    DeleteProviderConnection {
        provider_id: ProviderId,
        connection: ConnectionRef,
        #[serde(default)]
        logger_key: Option<String>,
    },
    ExecuteCleanupActions {
        provider_ids: Vec<ProviderId>,
        #[serde(default)]
        logger_key: Option<String>,
        #[serde(default)]
        token: Option<u64>,
    },
    GetCleanupActionNames {
        provider_ids: Vec<ProviderId>,
    },
    CreateCancellationToken,
    CancelToken {
        token: u64,
    },
    DisposeToken {
        token: u64,
        #[serde(default)]
        propagate_cancel: bool,
    },
    MarkAsReady,
    MarkAsExtensionsStarted,
    SurfaceReady,
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Invalid control request: {0}")]
    InvalidRequest(String),

    #[error("Unknown cancellation token: {0}")]
    TokenNotFound(u64),

    #[error("Response could not be serialized: {0}")]
    Serialization(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Event(#[from] EventError),
}

pub type ControlResult<T> = Result<T, ControlError>;

fn to_value<T: Serialize>(value: &T) -> ControlResult<Value> {
    serde_json::to_value(value).map_err(|e| ControlError::Serialization(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightCheckReport {
    pub title: String,
    #[serde(flatten)]
    pub result: CheckResult,
}

/// Collects check results and mirrors progress to the operation logger.
struct PreflightRecorder {
    logger: Arc<dyn OperationLogger>,
    checks: Mutex<Vec<PreflightCheckReport>>,
}

impl PreflightCallback for PreflightRecorder {
    fn start_check(&self, title: &str) {
        self.logger.log(&format!("checking {title}"));
    }

    fn end_check(&self, title: &str, result: &CheckResult) {
        match &result.description {
            Some(description) if !result.successful => {
                self.logger.warn(&format!("{title}: {description}"))
            }
            _ => self.logger.log(&format!("{title}: done")),
        }
        let mut checks = match self.checks.lock() {
            Ok(checks) => checks,
            Err(poisoned) => poisoned.into_inner(),
        };
        checks.push(PreflightCheckReport {
            title: title.to_string(),
            result: result.clone(),
        });
    }
}

/// Dispatches UI requests onto the registry and drives the readiness handshake.
pub struct ControlPlane {
    registry: ProviderRegistry,
    event_bus: Arc<EventBus>,
    tokens: Arc<CancellationTokenRegistry>,
    extensions_started: AtomicBool,
}

impl ControlPlane {
    pub fn new(registry: ProviderRegistry) -> Self {
        let event_bus = registry.event_bus().clone();
        let tokens = registry.tokens().clone();
        Self {
            registry,
            event_bus,
            tokens,
            extensions_started: AtomicBool::new(false),
        }
    }

    pub fn extensions_started(&self) -> bool {
        self.extensions_started.load(Ordering::SeqCst)
    }

    fn logger(&self, key: Option<String>, command: &str) -> Arc<dyn OperationLogger> {
        match key {
            Some(key) => Arc::new(EventLogger::new(key, self.event_bus.clone())),
            None => Arc::new(TracingLogger::new(command)),
        }
    }

    /// Parses and dispatches a raw JSON request.
    pub async fn dispatch_raw(&self, raw: &str) -> ControlResult<Value> {
        let request: ControlRequest =
            serde_json::from_str(raw).map_err(|e| ControlError::InvalidRequest(e.to_string()))?;
        self.dispatch(request).await
    }

    #[instrument(level = "debug", skip(self, request), fields(command = request.as_ref()))]
    pub async fn dispatch(&self, request: ControlRequest) -> ControlResult<Value> {
        let command = request.as_ref().to_string();
        let registry = &self.registry;
        match request {
            ControlRequest::GetProviderInfos => to_value(&registry.get_provider_infos()),
            ControlRequest::GetProviderInfo { provider_id } => {
                to_value(&registry.get_provider_info(provider_id)?)
            }
            ControlRequest::UpdateStatus {
                provider_id,
                status,
            } => {
                registry.update_status(provider_id, status)?;
                Ok(Value::Null)
            }
            ControlRequest::InstallProvider {
                provider_id,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                to_value(&registry.install_provider(provider_id, logger).await?)
            }
            ControlRequest::UpdateProvider {
                provider_id,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                to_value(&registry.update_provider(provider_id, logger).await?)
            }
            ControlRequest::RunPreflightChecks {
                provider_id,
                is_update,
                logger_key,
            } => {
                let recorder = PreflightRecorder {
                    logger: self.logger(logger_key, &command),
                    checks: Mutex::new(vec![]),
                };
                let passed = registry
                    .run_preflight_checks(provider_id, &recorder, is_update)
                    .await;
                recorder.logger.end();
                let passed = passed?;
                let checks = match recorder.checks.into_inner() {
                    Ok(checks) => checks,
                    Err(poisoned) => poisoned.into_inner(),
                };
                Ok(json!({ "passed": passed, "checks": to_value(&checks)? }))
            }
            ControlRequest::StartProvider {
                provider_id,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                registry.start_provider(provider_id, logger).await?;
                Ok(Value::Null)
            }
            ControlRequest::StopProvider {
                provider_id,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                registry.stop_provider(provider_id, logger).await?;
                Ok(Value::Null)
            }
            ControlRequest::InitializeProvider {
                provider_id,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                registry.initialize_provider(provider_id, logger).await?;
                Ok(Value::Null)
            }
            ControlRequest::CreateContainerProviderConnection {
                provider_id,
                params,
                logger_key,
                token,
            } => {
                let logger = self.logger(logger_key, &command);
                registry
                    .create_container_provider_connection(provider_id, params, logger, token)
                    .await?;
                Ok(Value::Null)
            }
            ControlRequest::CreateKubernetesProviderConnection {
                provider_id,
                params,
                logger_key,
                token,
            } => {
                let logger = self.logger(logger_key, &command);
                registry
                    .create_kubernetes_provider_connection(provider_id, params, logger, token)
                    .await?;
                Ok(Value::Null)
            }
            ControlRequest::StartProviderConnection {
                provider_id,
                connection,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                registry
                    .start_provider_connection(provider_id, &connection, logger)
                    .await?;
                Ok(Value::Null)
            }
            ControlRequest::StopProviderConnection {
                provider_id,
                connection,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                registry
                    .stop_provider_connection(provider_id, &connection, logger)
                    .await?;
                Ok(Value::Null)
            }
            ControlRequest::EditProviderConnection {
                provider_id,
                connection,
                params,
                logger_key,
                token,
            } => {
                let logger = self.logger(logger_key, &command);
                registry
                    .edit_provider_connection(provider_id, &connection, params, logger, token)
                    .await?;
                Ok(Value::Null)
            }
            ControlRequest::DeleteProviderConnection {
                provider_id,
                connection,
                logger_key,
            } => {
                let logger = self.logger(logger_key, &command);
                registry
                    .delete_provider_connection(provider_id, &connection, logger)
                    .await?;
                Ok(Value::Null)
            }
            ControlRequest::ExecuteCleanupActions {
                provider_ids,
                logger_key,
                token,
            } => {
                let logger = self.logger(logger_key, &command);
                to_value(
                    &registry
                        .execute_cleanup_actions(logger, &provider_ids, token)
                        .await?,
                )
            }
            ControlRequest::GetCleanupActionNames { provider_ids } => {
                to_value(&registry.get_cleanup_action_names(&provider_ids).await?)
            }
            ControlRequest::CreateCancellationToken => Ok(json!(self.tokens.create())),
            ControlRequest::CancelToken { token } => {
                if !self.tokens.cancel(token) {
                    return Err(ControlError::TokenNotFound(token));
                }
                Ok(Value::Null)
            }
            ControlRequest::DisposeToken {
                token,
                propagate_cancel,
            } => {
                let source = self
                    .tokens
                    .get(token)
                    .ok_or(ControlError::TokenNotFound(token))?;
                source.dispose(propagate_cancel);
                Ok(Value::Null)
            }
            ControlRequest::MarkAsReady => {
                self.event_bus.mark_backend_ready();
                info!("backend ready");
                Ok(Value::Null)
            }
            ControlRequest::MarkAsExtensionsStarted => {
                if !self.extensions_started.swap(true, Ordering::SeqCst) {
                    self.event_bus.publish(Channel::ExtensionsStarted, &json!({}))?;
                    info!("extensions started");
                } else {
                    debug!("extensions already marked as started");
                }
                Ok(Value::Null)
            }
            ControlRequest::SurfaceReady => {
                self.event_bus.mark_surface_ready();
                Ok(Value::Null)
            }
        }
    }
}
