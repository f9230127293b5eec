use std::env;

/// events kept per thread unless configured otherwise
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Knobs of an [super::Auditor].
///
/// A disabled auditor lets every check through and records nothing, so audited call sites
/// cost one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditorConfig {
    pub enabled: bool,
    /// how many lock/unlock events each thread's history keeps, the oldest go first
    pub history_capacity: usize,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl AuditorConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// A history needs room for at least the last event, the conflict check looks at it
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Reads the environment:
    /// - `LOCK_AUDIT` - `0`, `off` or `false` turns the auditor off
    /// - `LOCK_AUDIT_HISTORY` - history capacity, ignored unless it's a number
    pub fn from_env() -> Self {
        Self::from_vars(
            env::var("LOCK_AUDIT").ok().as_deref(),
            env::var("LOCK_AUDIT_HISTORY").ok().as_deref(),
        )
    }

    fn from_vars(enabled: Option<&str>, history: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(value) = enabled {
            let off = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "off" | "false"
            );
            config = config.with_enabled(!off);
        }
        match history.map(|h| h.trim().parse::<usize>()) {
            Some(Ok(capacity)) => config = config.with_history_capacity(capacity),
            Some(Err(e)) => log::warn!("ignoring LOCK_AUDIT_HISTORY: {e}"),
            None => {}
        }
        config
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = AuditorConfig::from_vars(None, None);
        assert!(config.enabled);
        assert_eq!(config.history_capacity, 50);
    }

    #[test]
    fn switches() {
        assert!(!AuditorConfig::from_vars(Some("off"), None).enabled);
        assert!(!AuditorConfig::from_vars(Some("0"), None).enabled);
        assert!(AuditorConfig::from_vars(Some("1"), None).enabled);
        assert_eq!(
            AuditorConfig::from_vars(None, Some("8")).history_capacity,
            8
        );
        assert_eq!(
            AuditorConfig::from_vars(None, Some("lots")).history_capacity,
            DEFAULT_HISTORY_CAPACITY
        );
        assert_eq!(AuditorConfig::default().with_history_capacity(0).history_capacity, 1);
    }
}
