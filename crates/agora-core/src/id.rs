use slotmap::new_key_type;

new_key_type! {
    /// Identifies an agent in the engine's agent table. Assigned on
    /// registration; stale after the agent is removed.
    pub struct AgentId;
}

/// A stable string key naming an agent kind in the scenario loader's
/// registry (e.g. `"market"`, `"facility"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct KindKey(pub String);

impl KindKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KindKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
