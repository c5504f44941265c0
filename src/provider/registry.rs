//! # Provider Registry
//!
//! Holds every registered provider and its connections, drives their status and
//! publishes each change on the [`EventBus`].
//!
//! ## Consistency
//!
//! Each provider sits behind its own entry with a `publish_lock`. Every mutation takes
//! that lock, changes the state, takes a snapshot and publishes it before releasing the
//! lock, so subscribers see the changes of one provider in the order they happened and
//! never observe a state that was not published. Operations on different providers share
//! no lock and their hook calls interleave freely.
//!
//! Local bus handlers run inside the publish. They may read the registry, but must not
//! synchronously mutate the provider whose event they are handling.
//!
//! Once a provider is unregistered its entry refuses every further mutation with
//! [`ProviderError::ProviderNotFound`], so an operation still running when the provider
//! goes away cannot publish it back into existence.
//!
//! ## Lifecycle operations
//!
//! Every operation taking a logger wraps it in an [`OperationScope`], so the caller's
//! logger sees `end` exactly once on every path, early errors included. Hook failures are
//! returned as [`ProviderError::OperationFailed`].
//!
//! Lifecycle operations on one provider run one at a time, and so do operations on one
//! connection. A failed operation puts the previous status back only while the status is
//! still the transitional one it wrote; a status reported by the extension during the
//! hook is kept. Hooks must not await another lifecycle operation on their own provider
//! or connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as OperationLock;
use tracing::{debug, info, instrument, trace, warn};

use super::hooks::{
    CheckResult, CleanupProvider, ConnectionLifecycle, ConnectionStatusProbe, ContainerConnection,
    KubernetesConnection, LifecycleHook, PreflightCallback, ProviderDescriptor, ProviderHooks,
    ProviderInstaller, ProviderLifecycle, ProviderUpdater, ConnectionFactory,
};
use super::types::{
    ConnectionInfo, ConnectionKind, ConnectionParams, ConnectionRef, ConnectionStatus,
    ContainerConnectionInfo, DetectionCheck, HookKind, KubernetesConnectionInfo, LifecycleMethod,
    Operation, ProviderCapabilities, ProviderError, ProviderEvent, ProviderId, ProviderInfo,
    ProviderResult, ProviderStatus, ProviderWarning,
};
use crate::cancellation::{CancellationToken, CancellationTokenRegistry};
use crate::disposable::Disposable;
use crate::event::logger::EndGuard;
use crate::event::{Channel, EventBus, EventResult, OperationLogger, OperationScope, TracingLogger};

struct ConnectionEntry {
    info: ConnectionInfo,
    lifecycle: ConnectionLifecycle,
    probe: Option<Arc<dyn ConnectionStatusProbe>>,
    operation: Arc<OperationLock<()>>,
}

/// A connection looked up for an operation.
struct ResolvedConnection {
    reference: ConnectionRef,
    lifecycle: ConnectionLifecycle,
    operation: Arc<OperationLock<()>>,
}

impl ConnectionEntry {
    fn kind(&self) -> ConnectionKind {
        match self.info {
            ConnectionInfo::Container(_) => ConnectionKind::Container,
            ConnectionInfo::Kubernetes(_) => ConnectionKind::Kubernetes,
        }
    }

    fn reference(&self) -> ConnectionRef {
        ConnectionRef {
            kind: self.kind(),
            name: self.info.name().to_string(),
            endpoint: self.info.endpoint().to_string(),
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) -> ConnectionStatus {
        let slot = match &mut self.info {
            ConnectionInfo::Container(c) => &mut c.status,
            ConnectionInfo::Kubernetes(k) => &mut k.status,
        };
        std::mem::replace(slot, status)
    }
}

struct ProviderState {
    id: String,
    name: String,
    status: ProviderStatus,
    version: Option<String>,
    update_version: Option<String>,
    detection_checks: Vec<DetectionCheck>,
    warnings: Vec<ProviderWarning>,
    connections: Vec<ConnectionEntry>,
}

impl ProviderState {
    /// Position of a connection, matched by endpoint first and by name second.
    fn position(&self, connection: &ConnectionRef) -> Option<usize> {
        let find = |matches: fn(&ConnectionEntry, &ConnectionRef) -> bool| {
            self.connections
                .iter()
                .position(|c| c.kind() == connection.kind && matches(c, connection))
        };
        let by_endpoint = if connection.endpoint.is_empty() {
            None
        } else {
            find(|c, r| c.info.endpoint() == r.endpoint)
        };
        by_endpoint.or_else(|| {
            if connection.name.is_empty() {
                None
            } else {
                find(|c, r| c.info.name() == r.name)
            }
        })
    }

    fn to_info(&self, internal_id: ProviderId, capabilities: ProviderCapabilities) -> ProviderInfo {
        let mut container_connections = vec![];
        let mut kubernetes_connections = vec![];
        for connection in &self.connections {
            match &connection.info {
                ConnectionInfo::Container(c) => container_connections.push(c.clone()),
                ConnectionInfo::Kubernetes(k) => kubernetes_connections.push(k.clone()),
            }
        }
        ProviderInfo {
            internal_id,
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            version: self.version.clone(),
            update_version: if capabilities.update {
                self.update_version.clone()
            } else {
                None
            },
            detection_checks: self.detection_checks.clone(),
            warnings: self.warnings.clone(),
            capabilities,
            container_connections,
            kubernetes_connections,
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct ProviderEntry {
    internal_id: ProviderId,
    state: RwLock<ProviderState>,
    hooks: RwLock<ProviderHooks>,
    publish_lock: Mutex<()>,
    /// Held for the whole of a provider lifecycle operation.
    operation: OperationLock<()>,
    registrations: Mutex<Vec<Disposable>>,
    removed: AtomicBool,
}

impl ProviderEntry {
    /// Fails once the provider was unregistered. Callers hold `publish_lock`.
    fn ensure_registered(&self) -> ProviderResult<()> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(ProviderError::ProviderNotFound(self.internal_id));
        }
        Ok(())
    }

    fn snapshot(&self) -> ProviderInfo {
        let capabilities = read(&self.hooks).capabilities();
        read(&self.state).to_info(self.internal_id, capabilities)
    }

    /// Publishes the current snapshot. Callers hold `publish_lock`.
    fn publish(
        &self,
        bus: &EventBus,
        channel: Channel,
        connection: Option<ConnectionRef>,
    ) -> EventResult<()> {
        bus.publish(
            channel,
            &ProviderEvent {
                provider: self.snapshot(),
                connection,
            },
        )
    }

    fn mutate<R, F>(
        &self,
        bus: &EventBus,
        channel: Channel,
        connection: Option<ConnectionRef>,
        f: F,
    ) -> ProviderResult<R>
    where
        F: FnOnce(&mut ProviderState) -> ProviderResult<R>,
    {
        let _publishing = lock(&self.publish_lock);
        self.ensure_registered()?;
        let result = f(&mut write(&self.state))?;
        self.publish(bus, channel, connection)?;
        Ok(result)
    }

    /// Sets the status and returns the previous one.
    fn set_status(&self, bus: &EventBus, status: ProviderStatus) -> ProviderResult<ProviderStatus> {
        self.mutate(bus, Channel::ProviderStatusUpdated, None, |state| {
            Ok(std::mem::replace(&mut state.status, status))
        })
    }

    /// Puts `previous` back if the status is still `expected`. Returns whether it did.
    fn restore_status(
        &self,
        bus: &EventBus,
        expected: ProviderStatus,
        previous: ProviderStatus,
    ) -> ProviderResult<bool> {
        let _publishing = lock(&self.publish_lock);
        self.ensure_registered()?;
        {
            let mut state = write(&self.state);
            if state.status != expected {
                return Ok(false);
            }
            state.status = previous;
        }
        self.publish(bus, Channel::ProviderStatusUpdated, None)?;
        Ok(true)
    }

    /// Resolves a connection reference to the full reference, its hooks and its lock.
    fn connection(&self, connection: &ConnectionRef) -> ProviderResult<ResolvedConnection> {
        let state = read(&self.state);
        let index = state
            .position(connection)
            .ok_or_else(|| ProviderError::ConnectionNotFound {
                provider_id: self.internal_id,
                connection: connection.clone(),
            })?;
        let found = &state.connections[index];
        Ok(ResolvedConnection {
            reference: found.reference(),
            lifecycle: found.lifecycle.clone(),
            operation: found.operation.clone(),
        })
    }

    fn set_connection_status(
        &self,
        bus: &EventBus,
        connection: &ConnectionRef,
        status: ConnectionStatus,
    ) -> ProviderResult<ConnectionStatus> {
        let provider_id = self.internal_id;
        self.mutate(
            bus,
            status_channel(connection.kind),
            Some(connection.clone()),
            |state| {
                let index =
                    state
                        .position(connection)
                        .ok_or_else(|| ProviderError::ConnectionNotFound {
                            provider_id,
                            connection: connection.clone(),
                        })?;
                Ok(state.connections[index].set_status(status))
            },
        )
    }

    /// Connection counterpart of [`ProviderEntry::restore_status`].
    fn restore_connection_status(
        &self,
        bus: &EventBus,
        connection: &ConnectionRef,
        expected: ConnectionStatus,
        previous: ConnectionStatus,
    ) -> ProviderResult<bool> {
        let _publishing = lock(&self.publish_lock);
        self.ensure_registered()?;
        {
            let mut state = write(&self.state);
            match state.position(connection) {
                Some(index) if state.connections[index].info.status() == expected => {
                    state.connections[index].set_status(previous);
                }
                _ => return Ok(false),
            }
        }
        self.publish(bus, status_channel(connection.kind), Some(connection.clone()))?;
        Ok(true)
    }

    /// Applies a probed status; publishes only when it differs.
    fn refresh_connection_status(
        &self,
        bus: &EventBus,
        connection: &ConnectionRef,
        status: ConnectionStatus,
    ) -> ProviderResult<bool> {
        let _publishing = lock(&self.publish_lock);
        self.ensure_registered()?;
        let changed = {
            let mut state = write(&self.state);
            match state.position(connection) {
                Some(index) if state.connections[index].info.status() != status => {
                    state.connections[index].set_status(status);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish(bus, status_channel(connection.kind), Some(connection.clone()))?;
        }
        Ok(changed)
    }

    /// Removes a connection and releases its endpoint. Returns `false` when it was already gone.
    fn detach_connection(
        &self,
        bus: &EventBus,
        endpoints: &DashMap<String, ProviderId>,
        connection: &ConnectionRef,
    ) -> ProviderResult<bool> {
        let _publishing = lock(&self.publish_lock);
        let removed = {
            let mut state = write(&self.state);
            state
                .position(connection)
                .map(|index| state.connections.remove(index).reference())
        };
        let Some(removed) = removed else {
            return Ok(false);
        };
        endpoints.remove_if(&removed.endpoint, |_, owner| *owner == self.internal_id);
        let channel = match removed.kind {
            ConnectionKind::Container => Channel::ProviderUnregisterContainerConnection,
            ConnectionKind::Kubernetes => Channel::ProviderUnregisterKubernetesConnection,
        };
        self.publish(bus, channel, Some(removed))?;
        Ok(true)
    }
}

fn status_channel(kind: ConnectionKind) -> Channel {
    match kind {
        ConnectionKind::Container => Channel::ContainerConnectionStatusUpdated,
        ConnectionKind::Kubernetes => Channel::KubernetesConnectionStatusUpdated,
    }
}

/// A hook slot value whose registration can be matched again on release.
trait HookSlot: Clone + Send + Sync + 'static {
    fn same(&self, other: &Self) -> bool;
}

impl<T: ?Sized + Send + Sync + 'static> HookSlot for Arc<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl HookSlot for ProviderLifecycle {
    fn same(&self, other: &Self) -> bool {
        fn same_hook(a: &Option<Arc<dyn LifecycleHook>>, b: &Option<Arc<dyn LifecycleHook>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }
        same_hook(&self.initialize, &other.initialize)
            && same_hook(&self.start, &other.start)
            && same_hook(&self.stop, &other.stop)
    }
}

fn begin(logger: Arc<dyn OperationLogger>) -> (Arc<dyn OperationLogger>, EndGuard) {
    let scope = OperationScope::new(logger);
    let guard = scope.guard();
    let logger: Arc<dyn OperationLogger> = scope;
    (logger, guard)
}

fn operation_failed(
    logger: &dyn OperationLogger,
    operation: Operation,
    target: impl fmt::Display,
    source: anyhow::Error,
) -> ProviderError {
    logger.error(&format!("{source:#}"));
    let error = ProviderError::OperationFailed {
        operation,
        target: target.to_string(),
        source,
    };
    warn!("{}", error);
    error
}

fn provider_target(internal_id: ProviderId) -> String {
    format!("provider {internal_id}")
}

/// One cleanup action as executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOutcome {
    pub provider_id: ProviderId,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of [`ProviderRegistry::execute_cleanup_actions`]. Cleanup is best effort:
/// completed actions stay completed whatever happens afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub outcomes: Vec<CleanupOutcome>,
    /// Providers whose action list could not be obtained.
    pub errors: Vec<String>,
    /// Set when the token stopped at least one provider's action list early.
    pub cancelled: bool,
}

impl CleanupReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.outcomes.iter().all(|o| o.error.is_none())
    }

    fn merge(&mut self, other: CleanupReport) {
        self.outcomes.extend(other.outcomes);
        self.errors.extend(other.errors);
        self.cancelled |= other.cancelled;
    }
}

/// Cleanup action names offered by one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupActionNames {
    pub provider_id: ProviderId,
    pub names: Vec<String>,
}

async fn cleanup_provider(
    provider_id: ProviderId,
    cleanup: Arc<dyn CleanupProvider>,
    logger: Arc<dyn OperationLogger>,
    token: CancellationToken,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    let actions = match cleanup.actions().await {
        Ok(actions) => actions,
        Err(e) => {
            let message = format!("cleanup actions of provider {provider_id} unavailable: {e:#}");
            logger.error(&message);
            report.errors.push(message);
            return report;
        }
    };

    for action in actions {
        if token.is_cancelled() {
            logger.warn(&format!("cleanup of provider {provider_id} cancelled"));
            report.cancelled = true;
            break;
        }
        let name = action.name().to_string();
        logger.log(&format!("running cleanup action {name}"));
        let error = match action.execute(logger.clone(), token.clone()).await {
            Ok(()) => None,
            Err(e) => {
                logger.error(&format!("cleanup action {name} failed: {e:#}"));
                Some(format!("{e:#}"))
            }
        };
        report.outcomes.push(CleanupOutcome {
            provider_id,
            action: name,
            error,
        });
    }
    report
}

/// Central store and orchestrator of providers.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<DashMap<ProviderId, Arc<ProviderEntry>>>,
    /// Endpoint to owning provider, across both connection kinds.
    endpoints: Arc<DashMap<String, ProviderId>>,
    next_id: Arc<AtomicU64>,
    event_bus: Arc<EventBus>,
    tokens: Arc<CancellationTokenRegistry>,
    parallel_cleanup: bool,
}

impl ProviderRegistry {
    pub fn new(event_bus: Arc<EventBus>, tokens: Arc<CancellationTokenRegistry>) -> Self {
        Self {
            providers: Arc::new(DashMap::new()),
            endpoints: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            event_bus,
            tokens,
            parallel_cleanup: true,
        }
    }

    /// Runs cleanup of different providers concurrently (default) or one after another.
    pub fn with_parallel_cleanup(mut self, parallel: bool) -> Self {
        self.parallel_cleanup = parallel;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn tokens(&self) -> &Arc<CancellationTokenRegistry> {
        &self.tokens
    }

    fn entry(&self, internal_id: ProviderId) -> ProviderResult<Arc<ProviderEntry>> {
        self.providers
            .get(&internal_id)
            .map(|entry| entry.value().clone())
            .ok_or(ProviderError::ProviderNotFound(internal_id))
    }

    fn entries(&self) -> Vec<Arc<ProviderEntry>> {
        self.providers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Adds a provider. Releasing the returned handle unregisters it together with every
    /// connection and hook registered on it afterwards.
    #[instrument(level = "debug", skip(self, descriptor), fields(provider = %descriptor.id))]
    pub fn register(&self, descriptor: ProviderDescriptor) -> ProviderResult<(ProviderId, Disposable)> {
        if descriptor.id.trim().is_empty() {
            return Err(ProviderError::InvalidDescriptor(
                "provider id must not be empty".to_string(),
            ));
        }
        if descriptor.name.trim().is_empty() {
            return Err(ProviderError::InvalidDescriptor(format!(
                "provider {} has no name",
                descriptor.id
            )));
        }

        let internal_id = ProviderId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let update_version = descriptor.hooks.updater.as_ref().map(|u| u.version());
        let entry = Arc::new(ProviderEntry {
            internal_id,
            state: RwLock::new(ProviderState {
                id: descriptor.id,
                name: descriptor.name,
                status: descriptor.status,
                version: descriptor.version,
                update_version,
                detection_checks: descriptor.detection_checks,
                warnings: descriptor.warnings,
                connections: vec![],
            }),
            hooks: RwLock::new(descriptor.hooks),
            publish_lock: Mutex::new(()),
            operation: OperationLock::new(()),
            registrations: Mutex::new(vec![]),
            removed: AtomicBool::new(false),
        });

        {
            let _publishing = lock(&entry.publish_lock);
            self.providers.insert(internal_id, entry.clone());
            if let Err(e) = entry.publish(&self.event_bus, Channel::ProviderCreate, None) {
                self.providers.remove(&internal_id);
                return Err(e.into());
            }
        }
        info!(%internal_id, "provider registered");

        let registry = self.clone();
        Ok((
            internal_id,
            Disposable::new(move || registry.unregister(internal_id)),
        ))
    }

    fn unregister(&self, internal_id: ProviderId) {
        let Some((_, entry)) = self.providers.remove(&internal_id) else {
            return;
        };
        {
            let _publishing = lock(&entry.publish_lock);
            entry.removed.store(true, Ordering::SeqCst);
        }

        let registrations = std::mem::take(&mut *lock(&entry.registrations));
        for registration in registrations {
            registration.dispose();
        }
        self.endpoints.retain(|_, owner| *owner != internal_id);

        let _publishing = lock(&entry.publish_lock);
        if let Err(e) = entry.publish(&self.event_bus, Channel::ProviderDelete, None) {
            warn!(%internal_id, "failed to publish provider removal: {}", e);
        }
        info!(%internal_id, "provider unregistered");
    }

    /// Overwrites the status. No transition table is enforced.
    #[instrument(level = "debug", skip(self))]
    pub fn update_status(&self, internal_id: ProviderId, status: ProviderStatus) -> ProviderResult<()> {
        self.entry(internal_id)?
            .set_status(&self.event_bus, status)?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, warnings))]
    pub fn update_warnings(
        &self,
        internal_id: ProviderId,
        warnings: Vec<ProviderWarning>,
    ) -> ProviderResult<()> {
        self.entry(internal_id)?.mutate(
            &self.event_bus,
            Channel::ProviderWarningsUpdated,
            None,
            |state| {
                state.warnings = warnings;
                Ok(())
            },
        )
    }

    #[instrument(level = "debug", skip(self))]
    pub fn update_version(&self, internal_id: ProviderId, version: String) -> ProviderResult<()> {
        self.entry(internal_id)?.mutate(
            &self.event_bus,
            Channel::ProviderVersionUpdated,
            None,
            |state| {
                state.version = Some(version);
                Ok(())
            },
        )
    }

    #[instrument(level = "debug", skip(self, checks))]
    pub fn update_detection_checks(
        &self,
        internal_id: ProviderId,
        checks: Vec<DetectionCheck>,
    ) -> ProviderResult<()> {
        self.entry(internal_id)?
            .mutate(&self.event_bus, Channel::ProviderChange, None, |state| {
                state.detection_checks = checks;
                Ok(())
            })
    }

    /// Sets or clears the advertised update target. Only shown while an updater is registered.
    #[instrument(level = "debug", skip(self))]
    pub fn set_update_info(
        &self,
        internal_id: ProviderId,
        version: Option<String>,
    ) -> ProviderResult<()> {
        self.entry(internal_id)?
            .mutate(&self.event_bus, Channel::ProviderChange, None, |state| {
                state.update_version = version;
                Ok(())
            })
    }

    fn register_hook<T: HookSlot>(
        &self,
        internal_id: ProviderId,
        kind: HookKind,
        channel: Channel,
        hook: T,
        slot: fn(&mut ProviderHooks) -> &mut Option<T>,
        prepare: fn(&mut ProviderState, &T),
    ) -> ProviderResult<Disposable> {
        let entry = self.entry(internal_id)?;
        {
            let _publishing = lock(&entry.publish_lock);
            entry.ensure_registered()?;
            {
                let mut hooks = write(&entry.hooks);
                let current = slot(&mut hooks);
                if current.is_some() {
                    return Err(ProviderError::HookAlreadyRegistered {
                        provider_id: internal_id,
                        hook: kind,
                    });
                }
                *current = Some(hook.clone());
            }
            prepare(&mut write(&entry.state), &hook);
            entry.publish(&self.event_bus, channel, None)?;
        }
        debug!(%internal_id, %kind, "hook registered");

        let weak = Arc::downgrade(&entry);
        let bus = self.event_bus.clone();
        let disposable = Disposable::new(move || {
            let Some(entry) = weak.upgrade() else {
                return;
            };
            if entry.removed.load(Ordering::SeqCst) {
                return;
            }
            let _publishing = lock(&entry.publish_lock);
            let released = {
                let mut hooks = write(&entry.hooks);
                let current = slot(&mut hooks);
                if current.as_ref().is_some_and(|c| c.same(&hook)) {
                    *current = None;
                    true
                } else {
                    false
                }
            };
            if released {
                debug!(internal_id = %entry.internal_id, %kind, "hook released");
                if let Err(e) = entry.publish(&bus, channel, None) {
                    warn!("failed to publish hook release: {}", e);
                }
            }
        });
        lock(&entry.registrations).push(disposable.clone());
        Ok(disposable)
    }

    pub fn register_installer(
        &self,
        internal_id: ProviderId,
        installer: Arc<dyn ProviderInstaller>,
    ) -> ProviderResult<Disposable> {
        self.register_hook(
            internal_id,
            HookKind::Installer,
            Channel::ProviderChange,
            installer,
            |hooks| &mut hooks.installer,
            |_, _| {},
        )
    }

    /// Registers an updater; its version becomes the advertised update target.
    pub fn register_updater(
        &self,
        internal_id: ProviderId,
        updater: Arc<dyn ProviderUpdater>,
    ) -> ProviderResult<Disposable> {
        self.register_hook(
            internal_id,
            HookKind::Updater,
            Channel::ProviderChange,
            updater,
            |hooks| &mut hooks.updater,
            |state, updater| state.update_version = Some(updater.version()),
        )
    }

    pub fn register_lifecycle(
        &self,
        internal_id: ProviderId,
        lifecycle: ProviderLifecycle,
    ) -> ProviderResult<Disposable> {
        self.register_hook(
            internal_id,
            HookKind::Lifecycle,
            Channel::ProviderLifecycleChange,
            lifecycle,
            |hooks| &mut hooks.lifecycle,
            |_, _| {},
        )
    }

    pub fn register_autostart(
        &self,
        internal_id: ProviderId,
        hook: Arc<dyn LifecycleHook>,
    ) -> ProviderResult<Disposable> {
        self.register_hook(
            internal_id,
            HookKind::Autostart,
            Channel::ProviderChange,
            hook,
            |hooks| &mut hooks.autostart,
            |_, _| {},
        )
    }

    pub fn register_cleanup(
        &self,
        internal_id: ProviderId,
        cleanup: Arc<dyn CleanupProvider>,
    ) -> ProviderResult<Disposable> {
        self.register_hook(
            internal_id,
            HookKind::Cleanup,
            Channel::ProviderChange,
            cleanup,
            |hooks| &mut hooks.cleanup,
            |_, _| {},
        )
    }

    pub fn register_container_connection_factory(
        &self,
        internal_id: ProviderId,
        factory: Arc<dyn ConnectionFactory>,
    ) -> ProviderResult<Disposable> {
        self.register_hook(
            internal_id,
            HookKind::ContainerConnectionFactory,
            Channel::ProviderChange,
            factory,
            |hooks| &mut hooks.container_factory,
            |_, _| {},
        )
    }

    pub fn register_kubernetes_connection_factory(
        &self,
        internal_id: ProviderId,
        factory: Arc<dyn ConnectionFactory>,
    ) -> ProviderResult<Disposable> {
        self.register_hook(
            internal_id,
            HookKind::KubernetesConnectionFactory,
            Channel::ProviderChange,
            factory,
            |hooks| &mut hooks.kubernetes_factory,
            |_, _| {},
        )
    }

    #[instrument(level = "debug", skip(self, connection), fields(endpoint = %connection.endpoint))]
    pub fn register_container_connection(
        &self,
        internal_id: ProviderId,
        connection: ContainerConnection,
    ) -> ProviderResult<Disposable> {
        let display_name = connection
            .display_name
            .unwrap_or_else(|| connection.name.clone());
        let lifecycle_methods = connection.lifecycle.methods();
        self.attach_connection(
            internal_id,
            ConnectionEntry {
                info: ConnectionInfo::Container(ContainerConnectionInfo {
                    name: connection.name,
                    display_name,
                    endpoint: connection.endpoint,
                    engine_type: connection.engine_type,
                    status: connection.status,
                    lifecycle_methods,
                }),
                lifecycle: connection.lifecycle,
                probe: connection.probe,
                operation: Arc::new(OperationLock::new(())),
            },
        )
    }

    #[instrument(level = "debug", skip(self, connection), fields(endpoint = %connection.endpoint))]
    pub fn register_kubernetes_connection(
        &self,
        internal_id: ProviderId,
        connection: KubernetesConnection,
    ) -> ProviderResult<Disposable> {
        let lifecycle_methods = connection.lifecycle.methods();
        self.attach_connection(
            internal_id,
            ConnectionEntry {
                info: ConnectionInfo::Kubernetes(KubernetesConnectionInfo {
                    name: connection.name,
                    endpoint: connection.endpoint,
                    status: connection.status,
                    lifecycle_methods,
                }),
                lifecycle: connection.lifecycle,
                probe: connection.probe,
                operation: Arc::new(OperationLock::new(())),
            },
        )
    }

    fn attach_connection(
        &self,
        internal_id: ProviderId,
        connection: ConnectionEntry,
    ) -> ProviderResult<Disposable> {
        let reference = connection.reference();
        if reference.name.trim().is_empty() || reference.endpoint.trim().is_empty() {
            return Err(ProviderError::InvalidDescriptor(format!(
                "{reference} needs a name and an endpoint"
            )));
        }
        let entry = self.entry(internal_id)?;
        {
            let _publishing = lock(&entry.publish_lock);
            entry.ensure_registered()?;
            {
                let mut state = write(&entry.state);
                if state
                    .connections
                    .iter()
                    .any(|c| c.kind() == reference.kind && c.info.name() == reference.name)
                {
                    return Err(ProviderError::DuplicateConnectionName {
                        provider_id: internal_id,
                        name: reference.name.clone(),
                    });
                }
                match self.endpoints.entry(reference.endpoint.clone()) {
                    Entry::Occupied(_) => {
                        return Err(ProviderError::DuplicateEndpoint(reference.endpoint.clone()))
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(internal_id);
                    }
                }
                state.connections.push(connection);
            }
            let channel = match reference.kind {
                ConnectionKind::Container => Channel::ProviderRegisterContainerConnection,
                ConnectionKind::Kubernetes => Channel::ProviderRegisterKubernetesConnection,
            };
            entry.publish(&self.event_bus, channel, Some(reference.clone()))?;
        }
        info!(%internal_id, connection = %reference, "connection registered");

        let weak = Arc::downgrade(&entry);
        let bus = self.event_bus.clone();
        let endpoints = self.endpoints.clone();
        let disposable = Disposable::new(move || match weak.upgrade() {
            Some(entry) => {
                if let Err(e) = entry.detach_connection(&bus, &endpoints, &reference) {
                    warn!(connection = %reference, "failed to publish connection removal: {}", e);
                }
            }
            None => {
                endpoints.remove_if(&reference.endpoint, |_, owner| *owner == internal_id);
            }
        });
        lock(&entry.registrations).push(disposable.clone());
        Ok(disposable)
    }

    /// Overwrites a connection's status and publishes it.
    #[instrument(level = "debug", skip(self))]
    pub fn update_connection_status(
        &self,
        internal_id: ProviderId,
        connection: &ConnectionRef,
        status: ConnectionStatus,
    ) -> ProviderResult<()> {
        let entry = self.entry(internal_id)?;
        let target = entry.connection(connection)?.reference;
        entry.set_connection_status(&self.event_bus, &target, status)?;
        Ok(())
    }

    /// Polls every connection that has a status probe and publishes the ones that changed.
    /// Connections with a lifecycle operation in progress are skipped. Returns how many
    /// changed.
    #[instrument(level = "trace", skip(self))]
    pub async fn refresh_connection_statuses(&self) -> usize {
        let mut probes = vec![];
        for entry in self.entries() {
            let state = read(&entry.state);
            for connection in &state.connections {
                let Some(probe) = &connection.probe else {
                    continue;
                };
                match connection.operation.clone().try_lock_owned() {
                    Ok(idle) => probes.push((
                        entry.clone(),
                        connection.reference(),
                        probe.clone(),
                        idle,
                    )),
                    Err(_) => {
                        trace!(connection = %connection.reference(), "operation in progress, not probing")
                    }
                }
            }
        }

        let statuses = join_all(probes.iter().map(|(_, _, probe, _)| probe.status())).await;

        let mut changed = 0;
        for ((entry, connection, _, _idle), status) in probes.iter().zip(statuses) {
            match entry.refresh_connection_status(&self.event_bus, connection, status) {
                Ok(true) => {
                    trace!(connection = %connection, %status, "connection status changed");
                    changed += 1;
                }
                Ok(false) | Err(ProviderError::ProviderNotFound(_)) => {}
                Err(e) => warn!(connection = %connection, "failed to publish status: {}", e),
            }
        }
        changed
    }

    /// Runs the installer. Preflight checks are not run here; see
    /// [`ProviderRegistry::run_preflight_checks`].
    #[instrument(level = "debug", skip(self, logger))]
    pub async fn install_provider(
        &self,
        internal_id: ProviderId,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<ProviderStatus> {
        let (logger, _end) = begin(logger);
        let entry = self.entry(internal_id)?;
        let installer = read(&entry.hooks)
            .installer
            .clone()
            .ok_or(ProviderError::MissingCapability {
                provider_id: internal_id,
                hook: HookKind::Installer,
            })?;

        let _operation = entry.operation.lock().await;
        let status = installer.install(logger.clone()).await.map_err(|source| {
            operation_failed(
                logger.as_ref(),
                Operation::Install,
                provider_target(internal_id),
                source,
            )
        })?;
        entry.set_status(&self.event_bus, status)?;
        info!(%internal_id, %status, "provider installed");
        Ok(status)
    }

    /// Runs the updater. Fails when no update is advertised.
    #[instrument(level = "debug", skip(self, logger))]
    pub async fn update_provider(
        &self,
        internal_id: ProviderId,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<ProviderStatus> {
        let (logger, _end) = begin(logger);
        let entry = self.entry(internal_id)?;
        let updater = read(&entry.hooks)
            .updater
            .clone()
            .ok_or(ProviderError::MissingCapability {
                provider_id: internal_id,
                hook: HookKind::Updater,
            })?;
        let target = read(&entry.state)
            .update_version
            .clone()
            .ok_or(ProviderError::NoUpdateAvailable(internal_id))?;

        let _operation = entry.operation.lock().await;
        let status = updater.update(logger.clone()).await.map_err(|source| {
            operation_failed(
                logger.as_ref(),
                Operation::Update,
                provider_target(internal_id),
                source,
            )
        })?;
        entry.mutate(&self.event_bus, Channel::ProviderChange, None, |state| {
            state.status = status;
            state.version = Some(target.clone());
            state.update_version = None;
            Ok(())
        })?;
        info!(%internal_id, version = %target, "provider updated");
        Ok(status)
    }

    /// Runs the installer's (or updater's) checks one after another. Every check runs even
    /// after a failure; the result is true only when all of them passed.
    #[instrument(level = "debug", skip(self, callback))]
    pub async fn run_preflight_checks(
        &self,
        internal_id: ProviderId,
        callback: &dyn PreflightCallback,
        is_update: bool,
    ) -> ProviderResult<bool> {
        let entry = self.entry(internal_id)?;
        let checks = {
            let hooks = read(&entry.hooks);
            if is_update {
                hooks
                    .updater
                    .as_ref()
                    .map(|updater| updater.preflight_checks())
                    .ok_or(ProviderError::MissingCapability {
                        provider_id: internal_id,
                        hook: HookKind::Updater,
                    })
            } else {
                hooks
                    .installer
                    .as_ref()
                    .map(|installer| installer.preflight_checks())
                    .ok_or(ProviderError::MissingCapability {
                        provider_id: internal_id,
                        hook: HookKind::Installer,
                    })
            }
        }?;

        let mut all_passed = true;
        for check in checks {
            let title = check.title().to_string();
            callback.start_check(&title);
            let result = match check.execute().await {
                Ok(result) => result,
                Err(e) => CheckResult::failed(format!("{e:#}")),
            };
            debug!(check = %title, successful = result.successful, "preflight check done");
            callback.end_check(&title, &result);
            all_passed &= result.successful;
        }
        Ok(all_passed)
    }

    async fn run_provider_hook(
        &self,
        internal_id: ProviderId,
        logger: Arc<dyn OperationLogger>,
        operation: Operation,
        select: fn(&ProviderLifecycle) -> Option<Arc<dyn LifecycleHook>>,
        transitional: ProviderStatus,
        done: ProviderStatus,
    ) -> ProviderResult<()> {
        let (logger, _end) = begin(logger);
        let entry = self.entry(internal_id)?;
        let hook = read(&entry.hooks).lifecycle.as_ref().and_then(select);
        let Some(hook) = hook else {
            debug!(%internal_id, %operation, "no hook registered, nothing to do");
            return Ok(());
        };

        let _operation = entry.operation.lock().await;
        let previous = entry.set_status(&self.event_bus, transitional)?;
        match hook.run(logger.clone()).await {
            Ok(()) => {
                entry.set_status(&self.event_bus, done)?;
                Ok(())
            }
            Err(source) => {
                let error = operation_failed(
                    logger.as_ref(),
                    operation,
                    provider_target(internal_id),
                    source,
                );
                match entry.restore_status(&self.event_bus, transitional, previous) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(%internal_id, %operation, "status changed by the hook, keeping it")
                    }
                    Err(e) => debug!(%internal_id, %operation, "status not restored: {}", e),
                }
                Err(error)
            }
        }
    }

    /// Runs the start hook. Without one this is a successful no-op.
    #[instrument(level = "debug", skip(self, logger))]
    pub async fn start_provider(
        &self,
        internal_id: ProviderId,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<()> {
        self.run_provider_hook(
            internal_id,
            logger,
            Operation::Start,
            |lifecycle| lifecycle.start.clone(),
            ProviderStatus::Starting,
            ProviderStatus::Started,
        )
        .await
    }

    /// Runs the stop hook. Without one this is a successful no-op.
    #[instrument(level = "debug", skip(self, logger))]
    pub async fn stop_provider(
        &self,
        internal_id: ProviderId,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<()> {
        self.run_provider_hook(
            internal_id,
            logger,
            Operation::Stop,
            |lifecycle| lifecycle.stop.clone(),
            ProviderStatus::Stopping,
            ProviderStatus::Stopped,
        )
        .await
    }

    /// Runs the initialize hook. Without one this is a successful no-op.
    #[instrument(level = "debug", skip(self, logger))]
    pub async fn initialize_provider(
        &self,
        internal_id: ProviderId,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<()> {
        self.run_provider_hook(
            internal_id,
            logger,
            Operation::Initialize,
            |lifecycle| lifecycle.initialize.clone(),
            ProviderStatus::Configuring,
            ProviderStatus::Configured,
        )
        .await
    }

    /// Runs every autostart hook concurrently. A failure is logged and affects no other
    /// provider. Returns how many hooks succeeded.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_autostart(&self) -> usize {
        let hooks: Vec<(ProviderId, Arc<dyn LifecycleHook>)> = self
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let hook = read(&entry.hooks).autostart.clone();
                hook.map(|hook| (entry.internal_id, hook))
            })
            .collect();

        let runs = hooks.into_iter().map(|(internal_id, hook)| async move {
            let logger: Arc<dyn OperationLogger> =
                Arc::new(TracingLogger::new(format!("autostart {internal_id}")));
            match hook.run(logger).await {
                Ok(()) => {
                    debug!(%internal_id, "autostart done");
                    true
                }
                Err(source) => {
                    let error = ProviderError::OperationFailed {
                        operation: Operation::Autostart,
                        target: provider_target(internal_id),
                        source,
                    };
                    warn!("{}", error);
                    false
                }
            }
        });
        join_all(runs).await.into_iter().filter(|ok| *ok).count()
    }

    async fn create_connection(
        &self,
        internal_id: ProviderId,
        kind: ConnectionKind,
        params: ConnectionParams,
        logger: Arc<dyn OperationLogger>,
        token: Option<u64>,
    ) -> ProviderResult<()> {
        let (logger, _end) = begin(logger);
        let entry = self.entry(internal_id)?;
        let (factory, hook) = {
            let hooks = read(&entry.hooks);
            match kind {
                ConnectionKind::Container => (
                    hooks.container_factory.clone(),
                    HookKind::ContainerConnectionFactory,
                ),
                ConnectionKind::Kubernetes => (
                    hooks.kubernetes_factory.clone(),
                    HookKind::KubernetesConnectionFactory,
                ),
            }
        };
        let factory = factory.ok_or(ProviderError::MissingCapability {
            provider_id: internal_id,
            hook,
        })?;

        let token = self.tokens.token_or_none(token);
        factory
            .create(params, logger.clone(), token.clone())
            .await
            .map_err(|source| {
                operation_failed(
                    logger.as_ref(),
                    Operation::CreateConnection,
                    provider_target(internal_id),
                    source,
                )
            })?;
        if token.is_cancelled() {
            debug!(%internal_id, %kind, "connection creation returned after cancellation");
        }
        Ok(())
    }

    /// Invokes the container connection factory. Cancellation through `token` is cooperative.
    #[instrument(level = "debug", skip(self, params, logger))]
    pub async fn create_container_provider_connection(
        &self,
        internal_id: ProviderId,
        params: ConnectionParams,
        logger: Arc<dyn OperationLogger>,
        token: Option<u64>,
    ) -> ProviderResult<()> {
        self.create_connection(internal_id, ConnectionKind::Container, params, logger, token)
            .await
    }

    /// Invokes the Kubernetes connection factory. Cancellation through `token` is cooperative.
    #[instrument(level = "debug", skip(self, params, logger))]
    pub async fn create_kubernetes_provider_connection(
        &self,
        internal_id: ProviderId,
        params: ConnectionParams,
        logger: Arc<dyn OperationLogger>,
        token: Option<u64>,
    ) -> ProviderResult<()> {
        self.create_connection(internal_id, ConnectionKind::Kubernetes, params, logger, token)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_connection_hook(
        &self,
        internal_id: ProviderId,
        connection: &ConnectionRef,
        logger: Arc<dyn OperationLogger>,
        method: LifecycleMethod,
        operation: Operation,
        transitional: ConnectionStatus,
        done: ConnectionStatus,
    ) -> ProviderResult<()> {
        let (logger, _end) = begin(logger);
        let entry = self.entry(internal_id)?;
        let resolved = entry.connection(connection)?;
        let target = resolved.reference;
        let hook = match method {
            LifecycleMethod::Start => resolved.lifecycle.start,
            _ => resolved.lifecycle.stop,
        }
        .ok_or_else(|| ProviderError::UnsupportedLifecycleMethod {
            connection: target.clone(),
            method,
        })?;

        let _operation = resolved.operation.lock().await;
        let previous = entry.set_connection_status(&self.event_bus, &target, transitional)?;
        match hook.run(logger.clone()).await {
            Ok(()) => {
                entry.set_connection_status(&self.event_bus, &target, done)?;
                Ok(())
            }
            Err(source) => {
                let error = operation_failed(logger.as_ref(), operation, &target, source);
                match entry.restore_connection_status(&self.event_bus, &target, transitional, previous)
                {
                    Ok(true) => {}
                    Ok(false) => debug!(connection = %target, "status changed by the hook, keeping it"),
                    Err(e) => debug!(connection = %target, "status not restored: {}", e),
                }
                Err(error)
            }
        }
    }

    #[instrument(level = "debug", skip(self, logger))]
    pub async fn start_provider_connection(
        &self,
        internal_id: ProviderId,
        connection: &ConnectionRef,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<()> {
        self.run_connection_hook(
            internal_id,
            connection,
            logger,
            LifecycleMethod::Start,
            Operation::StartConnection,
            ConnectionStatus::Starting,
            ConnectionStatus::Started,
        )
        .await
    }

    #[instrument(level = "debug", skip(self, logger))]
    pub async fn stop_provider_connection(
        &self,
        internal_id: ProviderId,
        connection: &ConnectionRef,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<()> {
        self.run_connection_hook(
            internal_id,
            connection,
            logger,
            LifecycleMethod::Stop,
            Operation::StopConnection,
            ConnectionStatus::Stopping,
            ConnectionStatus::Stopped,
        )
        .await
    }

    #[instrument(level = "debug", skip(self, params, logger))]
    pub async fn edit_provider_connection(
        &self,
        internal_id: ProviderId,
        connection: &ConnectionRef,
        params: ConnectionParams,
        logger: Arc<dyn OperationLogger>,
        token: Option<u64>,
    ) -> ProviderResult<()> {
        let (logger, _end) = begin(logger);
        let entry = self.entry(internal_id)?;
        let resolved = entry.connection(connection)?;
        let target = resolved.reference;
        let editor = resolved
            .lifecycle
            .edit
            .ok_or_else(|| ProviderError::UnsupportedLifecycleMethod {
                connection: target.clone(),
                method: LifecycleMethod::Edit,
            })?;

        let _operation = resolved.operation.lock().await;
        let token = self.tokens.token_or_none(token);
        editor
            .edit(params, logger.clone(), token)
            .await
            .map_err(|source| {
                operation_failed(logger.as_ref(), Operation::EditConnection, &target, source)
            })
    }

    /// Runs the delete hook and removes the connection once it succeeded.
    #[instrument(level = "debug", skip(self, logger))]
    pub async fn delete_provider_connection(
        &self,
        internal_id: ProviderId,
        connection: &ConnectionRef,
        logger: Arc<dyn OperationLogger>,
    ) -> ProviderResult<()> {
        let (logger, _end) = begin(logger);
        let entry = self.entry(internal_id)?;
        let resolved = entry.connection(connection)?;
        let target = resolved.reference;
        let hook = resolved
            .lifecycle
            .delete
            .ok_or_else(|| ProviderError::UnsupportedLifecycleMethod {
                connection: target.clone(),
                method: LifecycleMethod::Delete,
            })?;

        let _operation = resolved.operation.lock().await;
        hook.run(logger.clone()).await.map_err(|source| {
            operation_failed(logger.as_ref(), Operation::DeleteConnection, &target, source)
        })?;
        entry.detach_connection(&self.event_bus, &self.endpoints, &target)?;
        info!(%internal_id, connection = %target, "connection deleted");
        Ok(())
    }

    /// Runs the cleanup actions of the given providers. Actions of one provider run in
    /// sequence and stop early once `token` is cancelled; providers run concurrently when
    /// parallel cleanup is enabled. Providers without cleanup support are skipped.
    #[instrument(level = "debug", skip(self, logger))]
    pub async fn execute_cleanup_actions(
        &self,
        logger: Arc<dyn OperationLogger>,
        provider_ids: &[ProviderId],
        token: Option<u64>,
    ) -> ProviderResult<CleanupReport> {
        let (logger, _end) = begin(logger);
        let mut targets = vec![];
        for internal_id in provider_ids {
            let entry = self.entry(*internal_id)?;
            let cleanup = read(&entry.hooks).cleanup.clone();
            match cleanup {
                Some(cleanup) => targets.push((*internal_id, cleanup)),
                None => debug!(%internal_id, "provider has no cleanup actions"),
            }
        }

        let token = self.tokens.token_or_none(token);
        let runs = targets.into_iter().map(|(internal_id, cleanup)| {
            cleanup_provider(internal_id, cleanup, logger.clone(), token.clone())
        });
        let reports = if self.parallel_cleanup {
            join_all(runs).await
        } else {
            let mut reports = vec![];
            for run in runs {
                reports.push(run.await);
            }
            reports
        };

        let mut report = CleanupReport::default();
        for provider_report in reports {
            report.merge(provider_report);
        }
        debug!(
            actions = report.outcomes.len(),
            cancelled = report.cancelled,
            "cleanup finished"
        );
        Ok(report)
    }

    /// Names of the cleanup actions each provider offers, without running them.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_cleanup_action_names(
        &self,
        provider_ids: &[ProviderId],
    ) -> ProviderResult<Vec<CleanupActionNames>> {
        let mut names = vec![];
        for internal_id in provider_ids {
            let entry = self.entry(*internal_id)?;
            let cleanup = read(&entry.hooks).cleanup.clone();
            let Some(cleanup) = cleanup else {
                continue;
            };
            match cleanup.actions().await {
                Ok(actions) => names.push(CleanupActionNames {
                    provider_id: *internal_id,
                    names: actions.iter().map(|a| a.name().to_string()).collect(),
                }),
                Err(e) => warn!(%internal_id, "cleanup actions unavailable: {:#}", e),
            }
        }
        Ok(names)
    }

    /// Snapshot of every provider, ordered by internal id.
    pub fn get_provider_infos(&self) -> Vec<ProviderInfo> {
        let mut infos: Vec<ProviderInfo> = self.entries().iter().map(|e| e.snapshot()).collect();
        infos.sort_by_key(|info| info.internal_id);
        infos
    }

    pub fn get_provider_info(&self, internal_id: ProviderId) -> ProviderResult<ProviderInfo> {
        Ok(self.entry(internal_id)?.snapshot())
    }

    pub fn find_connection_by_endpoint(&self, endpoint: &str) -> Option<(ProviderId, ConnectionInfo)> {
        let owner = *self.endpoints.get(endpoint)?.value();
        let entry = self.entry(owner).ok()?;
        let state = read(&entry.state);
        let info = state
            .connections
            .iter()
            .find(|c| c.info.endpoint() == endpoint)
            .map(|c| c.info.clone());
        info.map(|info| (owner, info))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}
