//! Session-domain configuration view.

use crate::loader::ConfigManager;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    expiry_hours: u64,
    lookup_order: Vec<String>,
}

impl SessionConfig {
    pub fn from_config(config: &ConfigManager) -> Self {
        let expiry_hours = config.get_u64("session.expiryHours").unwrap_or(72);
        let lookup_order = config
            .get("session.lookupOrder")
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec!["wip".into(), "done".into(), "validated".into()]);
        Self {
            expiry_hours,
            lookup_order,
        }
    }

    pub fn expiry_hours(&self) -> u64 {
        self.expiry_hours
    }

    /// State directories searched, in order, when resolving a session id.
    pub fn lookup_order(&self) -> &[String] {
        &self.lookup_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_defaults() {
        let dir = tempdir().unwrap();
        let cfg = ConfigManager::load(dir.path()).unwrap();
        let sessions = SessionConfig::from_config(&cfg);
        assert_eq!(sessions.expiry_hours(), 72);
        assert_eq!(sessions.lookup_order(), &["wip", "done", "validated"]);
    }
}
