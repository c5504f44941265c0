//! Property-based tests for provider registration bookkeeping.

use std::collections::HashSet;

use drydock::{provider::ProviderDescriptor, Disposable, ProviderId};
use proptest::prelude::*;

use super::registry;

#[derive(Debug, Clone)]
enum Step {
    Register,
    /// Index into the registrations made so far, modulo their count.
    Unregister(usize),
}

fn steps_strategy() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(Step::Register),
            2 => any::<usize>().prop_map(Step::Unregister),
        ],
        0..40,
    )
}

proptest! {
    #[test]
    fn test_registered_providers_match_live_handles(steps in steps_strategy()) {
        let registry = registry();
        let mut handles: Vec<(ProviderId, Disposable)> = vec![];
        let mut live: HashSet<ProviderId> = HashSet::new();

        for (n, step) in steps.iter().enumerate() {
            match step {
                Step::Register => {
                    let descriptor = ProviderDescriptor::new(format!("p{}", n), format!("Provider {}", n));
                    let (id, handle) = registry.register(descriptor).unwrap();
                    prop_assert!(live.insert(id));
                    handles.push((id, handle));
                }
                Step::Unregister(index) => {
                    if handles.is_empty() {
                        continue;
                    }
                    let (id, handle) = &handles[index % handles.len()];
                    handle.dispose();
                    live.remove(id);
                }
            }

            let infos = registry.get_provider_infos();
            let ids: HashSet<ProviderId> = infos.iter().map(|info| info.internal_id).collect();
            prop_assert_eq!(ids.len(), infos.len());
            prop_assert_eq!(infos.len(), live.len());
            prop_assert_eq!(registry.provider_count(), live.len());
        }
    }
}
