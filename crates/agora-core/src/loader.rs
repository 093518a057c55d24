//! Data-driven scenario loading from JSON, TOML or RON.
//!
//! Feature-gated behind `scenario-loader`. A scenario names the engine's time
//! parameters, a set of agent prototypes, and the agents to create from them:
//!
//! ```json
//! {
//!   "engine": { "duration": 36, "step": 1 },
//!   "prototypes": {
//!     "milk-market": { "kind": "market" },
//!     "dairy": { "kind": "facility", "config": { "out_commod": "milk", "out_units": "milk",
//!                                                "out_size": 5, "create_rate": 5 } }
//!   },
//!   "agents": [
//!     { "id": "milk", "prototype": "milk-market", "service": "milk" },
//!     { "id": "farm", "prototype": "dairy", "parent": "milk" }
//!   ]
//! }
//! ```
//!
//! [`load_scenario_file`] picks the format from the file extension. Prototype
//! configs are kept as [`serde_json::Value`] whatever the source format, so
//! constructors only ever deal with one representation.
//!
//! Agent kinds are resolved through an [`AgentRegistry`]: a map from a
//! stable string key to a construction closure.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::agent::Agent;
use crate::engine::{Engine, EngineConfig, EngineError};
use crate::facility::{Facility, FacilityConfig};
use crate::id::{AgentId, KindKey};
use crate::market::{Market, MarketConfig};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a scenario.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("JSON parse error at line {line}, column {column}: {source}")]
    Parse {
        line: usize,
        column: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{format} parse error: {detail}")]
    Syntax { format: Format, detail: String },
    #[error("unsupported scenario format: {file}")]
    UnsupportedFormat { file: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unknown agent kind: {0}")]
    UnknownKind(KindKey),
    #[error("agent '{agent}' uses unknown prototype '{prototype}'")]
    UnknownPrototype { agent: String, prototype: String },
    #[error("agent '{agent}' names unknown parent '{parent}'")]
    UnknownParent { agent: String, parent: String },
    #[error("duplicate agent id: {0}")]
    DuplicateAgent(String),
    #[error("invalid {kind} config: {source}")]
    InvalidConfig {
        kind: KindKey,
        #[source]
        source: serde_json::Error,
    },
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl From<serde_json::Error> for LoadError {
    fn from(source: serde_json::Error) -> Self {
        LoadError::Parse {
            line: source.line(),
            column: source.column(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

/// Supported scenario file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
    Ron,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Json => "JSON",
            Format::Toml => "TOML",
            Format::Ron => "RON",
        })
    }
}

/// Detect the format of a scenario file from its extension.
pub fn detect_format(path: &Path) -> Result<Format, LoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        Some("ron") => Ok(Format::Ron),
        _ => Err(LoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Scenario data structures
// ---------------------------------------------------------------------------

/// Top-level scenario structure.
#[derive(Debug, serde::Deserialize)]
pub struct ScenarioData {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub prototypes: BTreeMap<String, PrototypeData>,
    #[serde(default)]
    pub agents: Vec<AgentData>,
}

/// A named template: an agent kind plus its configuration.
#[derive(Debug, serde::Deserialize)]
pub struct PrototypeData {
    pub kind: KindKey,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// One agent to instantiate.
#[derive(Debug, serde::Deserialize)]
pub struct AgentData {
    pub id: String,
    pub prototype: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Publish the agent under this service name.
    #[serde(default)]
    pub service: Option<String>,
}

// ---------------------------------------------------------------------------
// Agent registry
// ---------------------------------------------------------------------------

/// Builds an agent from its prototype's `config` value.
pub type AgentConstructor = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Agent>, LoadError>>;

/// Maps agent kind keys to constructors.
#[derive(Default)]
pub struct AgentRegistry {
    constructors: HashMap<KindKey, AgentConstructor>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.constructors.keys().map(KindKey::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("AgentRegistry").field("kinds", &kinds).finish()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `market` and `facility` kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("market", |value| {
            let config: MarketConfig = from_config("market", value)?;
            Ok(Box::new(Market::new(config)))
        });
        registry.register("facility", |value| {
            let config: FacilityConfig = from_config("facility", value)?;
            Ok(Box::new(Facility::new(config)))
        });
        registry
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Agent>, LoadError> + 'static,
    {
        self.constructors
            .insert(KindKey::new(kind), Box::new(constructor));
    }

    pub fn contains(&self, kind: &KindKey) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn construct(&self, kind: &KindKey, config: &serde_json::Value) -> Result<Box<dyn Agent>, LoadError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| LoadError::UnknownKind(kind.clone()))?;
        constructor(config)
    }
}

/// Deserialize a prototype config, treating a missing config as `{}`.
pub fn from_config<T>(kind: &str, value: &serde_json::Value) -> Result<T, LoadError>
where
    T: serde::de::DeserializeOwned,
{
    let value = if value.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|source| LoadError::InvalidConfig {
        kind: KindKey::new(kind),
        source,
    })
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// A loaded, ready-to-run scenario.
#[derive(Debug)]
pub struct Scenario {
    pub engine: Engine,
    /// Scenario agent ids mapped to engine ids.
    pub agents: BTreeMap<String, AgentId>,
}

impl Scenario {
    pub fn id(&self, name: &str) -> Option<AgentId> {
        self.agents.get(name).copied()
    }
}

/// Load a scenario from a JSON string.
pub fn load_scenario_json(json: &str, registry: &AgentRegistry) -> Result<Scenario, LoadError> {
    let data: ScenarioData = serde_json::from_str(json)?;
    build_scenario(data, registry)
}

/// Load a scenario from JSON bytes.
pub fn load_scenario_json_bytes(bytes: &[u8], registry: &AgentRegistry) -> Result<Scenario, LoadError> {
    let data: ScenarioData = serde_json::from_slice(bytes)?;
    build_scenario(data, registry)
}

/// Parse scenario text in the given format without building it.
pub fn parse_scenario(text: &str, format: Format) -> Result<ScenarioData, LoadError> {
    match format {
        Format::Json => Ok(serde_json::from_str(text)?),
        Format::Toml => toml::from_str(text).map_err(|e| LoadError::Syntax {
            format,
            detail: e.to_string(),
        }),
        Format::Ron => ron::from_str(text).map_err(|e| LoadError::Syntax {
            format,
            detail: e.to_string(),
        }),
    }
}

/// Load a scenario from a TOML string.
pub fn load_scenario_toml(text: &str, registry: &AgentRegistry) -> Result<Scenario, LoadError> {
    build_scenario(parse_scenario(text, Format::Toml)?, registry)
}

/// Load a scenario from a RON string.
pub fn load_scenario_ron(text: &str, registry: &AgentRegistry) -> Result<Scenario, LoadError> {
    build_scenario(parse_scenario(text, Format::Ron)?, registry)
}

/// Read a scenario file, detecting its format from the extension.
pub fn load_scenario_file(path: &Path, registry: &AgentRegistry) -> Result<Scenario, LoadError> {
    let format = detect_format(path)?;
    let text = std::fs::read_to_string(path)?;
    tracing::debug!(path = %path.display(), %format, "reading scenario");
    build_scenario(parse_scenario(&text, format)?, registry)
}

/// Instantiate a parsed scenario.
pub fn build_scenario(data: ScenarioData, registry: &AgentRegistry) -> Result<Scenario, LoadError> {
    for prototype in data.prototypes.values() {
        if !registry.contains(&prototype.kind) {
            return Err(LoadError::UnknownKind(prototype.kind.clone()));
        }
    }

    let mut engine = Engine::new(data.engine)?;
    let mut agents = BTreeMap::new();

    for entry in &data.agents {
        if agents.contains_key(&entry.id) {
            return Err(LoadError::DuplicateAgent(entry.id.clone()));
        }
        let prototype = data
            .prototypes
            .get(&entry.prototype)
            .ok_or_else(|| LoadError::UnknownPrototype {
                agent: entry.id.clone(),
                prototype: entry.prototype.clone(),
            })?;
        let agent = registry.construct(&prototype.kind, &prototype.config)?;
        let registration = engine.register_all(entry.id.as_str(), agent);
        agents.insert(entry.id.clone(), registration.id);
    }

    // Links resolve once every agent exists, so parents may be listed after
    // their children.
    for entry in &data.agents {
        let id = agents[&entry.id];
        if let Some(parent) = &entry.parent {
            let parent_id = *agents.get(parent).ok_or_else(|| LoadError::UnknownParent {
                agent: entry.id.clone(),
                parent: parent.clone(),
            })?;
            engine.set_parent(id, Some(parent_id))?;
        }
        if let Some(service) = &entry.service {
            engine.register_service(service.as_str(), id)?;
        }
    }

    tracing::debug!(
        agents = agents.len(),
        prototypes = data.prototypes.len(),
        "scenario loaded"
    );
    Ok(Scenario { engine, agents })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Role;

    const DAIRY: &str = r#"{
        "engine": { "duration": 3, "step": 1 },
        "prototypes": {
            "mkt": { "kind": "market", "config": { "shuffle": true, "seed": 9 } },
            "farm": { "kind": "facility", "config": {
                "out_commod": "milk", "out_units": "milk", "out_size": 5, "create_rate": 5 } },
            "dump": { "kind": "facility", "config": {
                "in_commod": "milk", "in_units": "milk", "in_size": 100 } }
        },
        "agents": [
            { "id": "farm", "prototype": "farm", "parent": "region" },
            { "id": "region", "prototype": "mkt", "service": "milk" },
            { "id": "dump", "prototype": "dump" }
        ]
    }"#;

    #[test]
    fn loads_agents_links_and_services() {
        let scenario = load_scenario_json(DAIRY, &AgentRegistry::with_builtins()).unwrap();
        let farm = scenario.id("farm").unwrap();
        let region = scenario.id("region").unwrap();

        let engine = &scenario.engine;
        assert_eq!(engine.config().duration, 3);
        assert_eq!(engine.agents().parent(farm), Some(region));
        assert_eq!(engine.service("milk").unwrap(), region);
        assert_eq!(engine.roster(Role::Resolver), &[region]);
        assert_eq!(engine.roster(Role::Ticker).len(), 2);
        assert!(engine.agent::<Market>(region).unwrap().config().shuffle);
        assert_eq!(
            engine.agent::<Facility>(farm).unwrap().config().out_commod.as_deref(),
            Some("milk")
        );
    }

    #[test]
    fn parse_errors_report_position() {
        let err = load_scenario_json("{\n  \"engine\": [", &AgentRegistry::with_builtins()).unwrap_err();
        match err {
            LoadError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = r#"{ "prototypes": { "x": { "kind": "reactor" } } }"#;
        let err = load_scenario_json(json, &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::UnknownKind(k) if k.as_str() == "reactor"));
    }

    #[test]
    fn unknown_prototype_is_rejected() {
        let json = r#"{ "agents": [ { "id": "a", "prototype": "ghost" } ] }"#;
        let err = load_scenario_json(json, &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::UnknownPrototype { .. }));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let json = r#"{
            "prototypes": { "m": { "kind": "market" } },
            "agents": [ { "id": "a", "prototype": "m", "parent": "nobody" } ]
        }"#;
        let err = load_scenario_json(json, &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::UnknownParent { ref parent, .. } if parent == "nobody"));
    }

    #[test]
    fn duplicate_ids_and_services_are_rejected() {
        let dup_id = r#"{
            "prototypes": { "m": { "kind": "market" } },
            "agents": [ { "id": "a", "prototype": "m" }, { "id": "a", "prototype": "m" } ]
        }"#;
        let err = load_scenario_json(dup_id, &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateAgent(ref id) if id == "a"));

        let dup_service = r#"{
            "prototypes": { "m": { "kind": "market" } },
            "agents": [
                { "id": "a", "prototype": "m", "service": "milk" },
                { "id": "b", "prototype": "m", "service": "milk" }
            ]
        }"#;
        let err = load_scenario_json(dup_service, &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::Engine(EngineError::DuplicateService(_))));
    }

    #[test]
    fn invalid_config_names_the_kind() {
        let json = r#"{
            "prototypes": { "f": { "kind": "facility", "config": { "in_size": "lots" } } },
            "agents": [ { "id": "f", "prototype": "f" } ]
        }"#;
        let err = load_scenario_json(json, &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidConfig { ref kind, .. } if kind.as_str() == "facility"));
    }

    #[test]
    fn zero_step_is_an_engine_error() {
        let json = r#"{ "engine": { "step": 0 } }"#;
        let err = load_scenario_json(json, &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::Engine(EngineError::ZeroStep)));
    }

    const DAIRY_TOML: &str = r#"
        [engine]
        duration = 3

        [prototypes.mkt]
        kind = "market"
        config = { shuffle = true, seed = 9 }

        [prototypes.farm]
        kind = "facility"
        config = { out_commod = "milk", out_units = "milk", out_size = 5.0, create_rate = 5.0 }

        [[agents]]
        id = "farm"
        prototype = "farm"
        parent = "region"

        [[agents]]
        id = "region"
        prototype = "mkt"
        service = "milk"
    "#;

    const DAIRY_RON: &str = r#"(
        engine: (duration: 3),
        prototypes: {
            "mkt": (kind: "market", config: { "shuffle": true, "seed": 9 }),
            "farm": (kind: "facility", config: {
                "out_commod": "milk", "out_units": "milk", "out_size": 5.0, "create_rate": 5.0,
            }),
        },
        agents: [
            (id: "farm", prototype: "farm", parent: Some("region")),
            (id: "region", prototype: "mkt", service: Some("milk")),
        ],
    )"#;

    fn assert_dairy_shape(scenario: &Scenario) {
        let farm = scenario.id("farm").unwrap();
        let region = scenario.id("region").unwrap();
        let engine = &scenario.engine;
        assert_eq!(engine.config().duration, 3);
        assert_eq!(engine.agents().parent(farm), Some(region));
        assert_eq!(engine.service("milk").unwrap(), region);
        assert_eq!(engine.agent::<Market>(region).unwrap().config().seed, 9);
        assert_eq!(engine.agent::<Facility>(farm).unwrap().config().create_rate, 5.0);
    }

    #[test]
    fn toml_scenarios_load_like_json() {
        let scenario = load_scenario_toml(DAIRY_TOML, &AgentRegistry::with_builtins()).unwrap();
        assert_dairy_shape(&scenario);
    }

    #[test]
    fn ron_scenarios_load_like_json() {
        let scenario = load_scenario_ron(DAIRY_RON, &AgentRegistry::with_builtins()).unwrap();
        assert_dairy_shape(&scenario);
    }

    #[test]
    fn format_is_detected_from_extension() {
        assert_eq!(detect_format(Path::new("a.json")).unwrap(), Format::Json);
        assert_eq!(detect_format(Path::new("a.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("a.ron")).unwrap(), Format::Ron);
        assert!(matches!(
            detect_format(Path::new("a.yaml")),
            Err(LoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("scenario")),
            Err(LoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn toml_syntax_errors_name_the_format() {
        let err = load_scenario_toml("[engine\nduration = 3", &AgentRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, LoadError::Syntax { format: Format::Toml, .. }));
        assert!(err.to_string().starts_with("TOML parse error"));
    }

    #[test]
    fn scenario_files_are_read_by_extension() {
        let dir = std::env::temp_dir().join(format!("agora_loader_test_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("dairy.ron");
        std::fs::write(&path, DAIRY_RON).unwrap();
        let scenario = load_scenario_file(&path, &AgentRegistry::with_builtins()).unwrap();
        assert_dairy_shape(&scenario);

        let missing = load_scenario_file(&dir.join("absent.toml"), &AgentRegistry::with_builtins());
        assert!(matches!(missing, Err(LoadError::Io(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn custom_kinds_can_be_registered() {
        let mut registry = AgentRegistry::new();
        registry.register("relay", |_| Ok(Box::new(crate::test_utils::Relay)));
        let json = r#"{
            "prototypes": { "r": { "kind": "relay" } },
            "agents": [ { "id": "r1", "prototype": "r" } ]
        }"#;
        let scenario = load_scenario_json(json, &registry).unwrap();
        assert!(scenario.engine.agent::<crate::test_utils::Relay>(scenario.id("r1").unwrap()).is_some());
    }
}
