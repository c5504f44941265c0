//! Tray menu projection.
//!
//! [`TrayMenu`] listens to provider events on the bus and keeps a read-only menu model:
//! one entry per provider with the actions valid for its current status, plus a single
//! [`GlobalStatus`]. It never talks to the registry after the initial seed, so it cannot
//! drift from what was published.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::disposable::Disposable;
use crate::event::{Channel, EventBus};
use crate::provider::{
    ConnectionRef, ConnectionStatus, LifecycleMethod, ProviderEvent, ProviderId, ProviderInfo,
    ProviderRegistry, ProviderStatus,
};

/// Aggregate status shown by the tray icon.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GlobalStatus {
    #[default]
    Initialized,
    Updating,
    Ready,
}

impl GlobalStatus {
    /// `updating` if anything is starting or stopping, else `ready` if anything is started.
    pub fn compute<'a>(providers: impl IntoIterator<Item = &'a ProviderInfo>) -> Self {
        let mut any_started = false;
        for provider in providers {
            if provider.status.is_transitional()
                || provider.connection_statuses().any(|s| s.is_transitional())
            {
                return GlobalStatus::Updating;
            }
            any_started |= provider.status == ProviderStatus::Started
                || provider
                    .connection_statuses()
                    .any(|s| s == ConnectionStatus::Started);
        }
        if any_started {
            GlobalStatus::Ready
        } else {
            GlobalStatus::Initialized
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TrayAction {
    StartProvider,
    StopProvider,
    StartConnection,
    StopConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMenuItem {
    pub connection: ConnectionRef,
    pub status: ConnectionStatus,
    pub actions: Vec<TrayAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMenuItem {
    pub internal_id: ProviderId,
    pub label: String,
    pub status: ProviderStatus,
    pub actions: Vec<TrayAction>,
    pub connections: Vec<ConnectionMenuItem>,
}

impl ProviderMenuItem {
    fn from_info(info: &ProviderInfo) -> Self {
        let mut actions = vec![];
        if info.capabilities.start
            && matches!(
                info.status,
                ProviderStatus::Installed | ProviderStatus::Configured | ProviderStatus::Stopped
            )
        {
            actions.push(TrayAction::StartProvider);
        }
        if info.capabilities.stop && info.status == ProviderStatus::Started {
            actions.push(TrayAction::StopProvider);
        }

        let container = info.container_connections.iter().map(|c| {
            (
                ConnectionRef::container(&c.name, &c.endpoint),
                c.status,
                &c.lifecycle_methods,
            )
        });
        let kubernetes = info.kubernetes_connections.iter().map(|k| {
            (
                ConnectionRef::kubernetes(&k.name, &k.endpoint),
                k.status,
                &k.lifecycle_methods,
            )
        });
        let connections = container
            .chain(kubernetes)
            .map(|(connection, status, methods)| {
                let mut actions = vec![];
                if methods.supports(LifecycleMethod::Start) && status == ConnectionStatus::Stopped {
                    actions.push(TrayAction::StartConnection);
                }
                if methods.supports(LifecycleMethod::Stop) && status == ConnectionStatus::Started {
                    actions.push(TrayAction::StopConnection);
                }
                ConnectionMenuItem {
                    connection,
                    status,
                    actions,
                }
            })
            .collect();

        Self {
            internal_id: info.internal_id,
            label: info.name.clone(),
            status: info.status,
            actions,
            connections,
        }
    }
}

/// Payload of [`Channel::TrayStatusUpdated`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayState {
    pub global_status: GlobalStatus,
    pub items: Vec<ProviderMenuItem>,
}

#[derive(Default)]
struct TrayModel {
    providers: BTreeMap<ProviderId, ProviderInfo>,
    state: TrayState,
}

impl TrayModel {
    /// Recomputes the projection; returns the new state when it changed.
    fn refresh(&mut self) -> Option<TrayState> {
        let state = TrayState {
            global_status: GlobalStatus::compute(self.providers.values()),
            items: self
                .providers
                .values()
                .map(ProviderMenuItem::from_info)
                .collect(),
        };
        if state == self.state {
            return None;
        }
        self.state = state.clone();
        Some(state)
    }
}

fn lock(model: &Mutex<TrayModel>) -> MutexGuard<'_, TrayModel> {
    match model.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Derived tray menu kept in sync through bus events.
pub struct TrayMenu {
    model: Arc<Mutex<TrayModel>>,
    subscriptions: Disposable,
}

impl TrayMenu {
    /// Subscribes to the registry's provider channels and seeds the model with the
    /// providers already registered.
    pub fn attach(registry: &ProviderRegistry) -> Self {
        let bus = registry.event_bus();
        let model = Arc::new(Mutex::new(TrayModel::default()));

        let subscriptions = Channel::iter()
            .filter(Channel::carries_provider)
            .map(|channel| {
                let model = model.clone();
                let weak_bus = Arc::downgrade(bus);
                bus.receive(channel.as_ref(), move |payload| {
                    match serde_json::from_value::<ProviderEvent>(payload.clone()) {
                        Ok(event) => apply(&model, &weak_bus, channel, event.provider),
                        Err(e) => warn!(%channel, "tray ignored malformed provider event: {}", e),
                    }
                })
            })
            .collect();

        // Events that raced the subscription are newer than the seed; keep those.
        let changed = {
            let mut guard = lock(&model);
            for info in registry.get_provider_infos() {
                guard.providers.entry(info.internal_id).or_insert(info);
            }
            guard.refresh()
        };
        if let Some(state) = changed {
            publish(&Arc::downgrade(bus), &state);
        }

        Self {
            model,
            subscriptions: Disposable::from_all(subscriptions),
        }
    }

    pub fn global_status(&self) -> GlobalStatus {
        lock(&self.model).state.global_status
    }

    pub fn items(&self) -> Vec<ProviderMenuItem> {
        lock(&self.model).state.items.clone()
    }

    pub fn state(&self) -> TrayState {
        lock(&self.model).state.clone()
    }

    /// Stops following bus events; the model keeps its last state.
    pub fn detach(&self) {
        self.subscriptions.dispose();
    }
}

fn apply(model: &Mutex<TrayModel>, bus: &Weak<EventBus>, channel: Channel, info: ProviderInfo) {
    let changed = {
        let mut guard = lock(model);
        if channel == Channel::ProviderDelete {
            guard.providers.remove(&info.internal_id);
        } else {
            guard.providers.insert(info.internal_id, info);
        }
        guard.refresh()
    };
    if let Some(state) = changed {
        publish(bus, &state);
    }
}

fn publish(bus: &Weak<EventBus>, state: &TrayState) {
    let Some(bus) = bus.upgrade() else {
        return;
    };
    debug!(global_status = %state.global_status, "tray status changed");
    if let Err(e) = bus.publish(Channel::TrayStatusUpdated, state) {
        warn!("failed to publish tray status: {}", e);
    }
}
