//! Provider and connection lifecycle orchestration.
//!
//! Providers (container engines, Kubernetes distributions) register with a
//! [`provider::ProviderRegistry`] and attach hooks for install, update, start, stop and
//! connection management. Every change is published on the [`event::EventBus`], which
//! buffers events until a UI surface is ready to consume them.

pub mod cancellation;
pub mod config;
pub mod control;
pub mod diagnostic;
pub mod disposable;
pub mod error;
pub mod event;
pub mod provider;
pub mod system;
pub mod tray;

// Re-exports
pub use cancellation::{CancellationToken, CancellationTokenRegistry};
pub use config::SystemConfig;
pub use disposable::Disposable;
pub use error::{Error, InternalResult};
pub use event::{Channel, EventBus, OperationLogger};
pub use provider::{ProviderDescriptor, ProviderError, ProviderId, ProviderRegistry};
pub use system::System;

#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
