//! Configuration variables threaded into the spawned child.
//!
//! Each session gets its own copy; mutating one session's environment never
//! affects another's (hence `Clone`, never shared references).

use std::collections::BTreeMap;
use std::time::Duration;

pub const BOARD_VAR: &str = "BOARD";
pub const PORT_VAR: &str = "PORT";
pub const TIMEOUT_VAR: &str = "DUT_TIMEOUT";

/// Variables that pass through this harness: `BOARD`, `PORT`,
/// `DUT_TIMEOUT`. Anything else placed in the map is forwarded untouched.
pub const PASSTHROUGH_VARS: &[&str] = &[BOARD_VAR, PORT_VAR, TIMEOUT_VAR];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the harness-relevant variables from the host environment.
    pub fn from_host() -> Self {
        let mut env = Self::new();
        for var in PASSTHROUGH_VARS {
            if let Ok(value) = std::env::var(var) {
                env.set(var, &value);
            }
        }
        env
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Target board identity (`BOARD`).
    pub fn board(&self) -> Option<&str> {
        self.get(BOARD_VAR)
    }

    /// Transport address, e.g. a serial device path (`PORT`).
    pub fn port(&self) -> Option<&str> {
        self.get(PORT_VAR)
    }

    /// Per-run timeout override in whole seconds (`DUT_TIMEOUT`).
    pub fn timeout_override(&self) -> Option<Duration> {
        self.get(TIMEOUT_VAR)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    pub fn as_pairs(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let env = Environment::new()
            .with(BOARD_VAR, "native")
            .with(PORT_VAR, "/dev/ttyACM0");
        assert_eq!(env.board(), Some("native"));
        assert_eq!(env.port(), Some("/dev/ttyACM0"));
        assert_eq!(env.timeout_override(), None);
    }

    #[test]
    fn test_timeout_override_parses_seconds() {
        let env = Environment::new().with(TIMEOUT_VAR, "30");
        assert_eq!(env.timeout_override(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_timeout_override_garbage_ignored() {
        let env = Environment::new().with(TIMEOUT_VAR, "soon");
        assert_eq!(env.timeout_override(), None);
    }

    #[test]
    fn test_clone_is_independent() {
        let a = Environment::new().with(BOARD_VAR, "native");
        let mut b = a.clone();
        b.set(BOARD_VAR, "samr21-xpro");
        assert_eq!(a.board(), Some("native"));
        assert_eq!(b.board(), Some("samr21-xpro"));
    }

    #[test]
    fn test_as_pairs_round_trip() {
        let env = Environment::new().with("A", "1").with("B", "2");
        let pairs = env.as_pairs();
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }
}
