mod connection_test;
mod registry_proptest;
mod system_test;

use std::sync::Arc;

use drydock::{CancellationTokenRegistry, EventBus, ProviderRegistry};

pub fn registry() -> ProviderRegistry {
    ProviderRegistry::new(
        Arc::new(EventBus::new(256)),
        Arc::new(CancellationTokenRegistry::new()),
    )
}
