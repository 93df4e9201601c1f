use std::fmt;

/// Lifecycle state of a plugin.
///
/// ```text
/// Discovered ──► Resolved ──► Loading ──► Enabled ──► Disabling ──► Disabled
///                                │            │            │            │
///                                ▼            ▼            ▼            │
///                              Failed ◄───────┴────────────┘            │
///                                ▲                                      │
///                                └──────────── Loading ◄────────────────┘
/// ```
///
/// `Disabled → Loading` re-enables a plugin. `Failed` is terminal until the
/// plugin is removed and discovered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Discovered,
    Resolved,
    Loading,
    Enabled,
    Disabling,
    Disabled,
    Failed,
}

impl PluginState {
    /// Returns `true` if the state machine allows `self → next`.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Discovered, Resolved)
                | (Resolved, Loading)
                | (Loading, Enabled)
                | (Loading, Failed)
                | (Enabled, Disabling)
                | (Enabled, Failed)
                | (Disabling, Disabled)
                | (Disabling, Failed)
                | (Disabled, Loading)
        )
    }

    pub fn is_enabled(self) -> bool {
        self == PluginState::Enabled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Resolved => "resolved",
            Self::Loading => "loading",
            Self::Enabled => "enabled",
            Self::Disabling => "disabling",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::PluginState::*;

    #[test]
    fn test_happy_path() {
        let path = [Discovered, Resolved, Loading, Enabled, Disabling, Disabled, Loading];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Discovered.can_transition_to(Loading));
        assert!(!Resolved.can_transition_to(Enabled));
        assert!(!Enabled.can_transition_to(Loading));
        assert!(!Failed.can_transition_to(Loading));
        assert!(!Disabled.can_transition_to(Enabled));
    }
}
