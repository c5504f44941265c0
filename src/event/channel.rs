/// Channels published by the orchestration core.
///
/// The string form is the wire name seen by UI surfaces and local subscribers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Channel {
    ProviderCreate,
    ProviderDelete,
    ProviderChange,
    ProviderStatusUpdated,
    ProviderWarningsUpdated,
    ProviderVersionUpdated,
    ProviderLifecycleChange,
    ProviderRegisterContainerConnection,
    ProviderUnregisterContainerConnection,
    ProviderRegisterKubernetesConnection,
    ProviderUnregisterKubernetesConnection,
    ContainerConnectionStatusUpdated,
    KubernetesConnectionStatusUpdated,
    TaskLog,
    TaskEnd,
    ExtensionsStarted,
    TrayStatusUpdated,
}

impl Channel {
    /// Channels carrying a provider snapshot as payload.
    pub fn carries_provider(&self) -> bool {
        !matches!(
            self,
            Channel::TaskLog
                | Channel::TaskEnd
                | Channel::ExtensionsStarted
                | Channel::TrayStatusUpdated
        )
    }

    /// High-frequency channels, logged at trace level.
    pub fn is_noisy(&self) -> bool {
        matches!(
            self,
            Channel::TaskLog
                | Channel::ContainerConnectionStatusUpdated
                | Channel::KubernetesConnectionStatusUpdated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            Channel::ProviderStatusUpdated.to_string(),
            "provider-status-updated"
        );
        assert_eq!(
            Channel::ProviderRegisterKubernetesConnection.as_ref(),
            "provider-register-kubernetes-connection"
        );
        assert_eq!(Channel::from_str("task-end").unwrap(), Channel::TaskEnd);
    }

    #[test]
    fn test_names_round_trip() {
        for channel in Channel::iter() {
            assert_eq!(Channel::from_str(channel.as_ref()).unwrap(), channel);
        }
    }
}
