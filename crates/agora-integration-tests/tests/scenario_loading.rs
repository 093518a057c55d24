//! Scenarios loaded from JSON and TOML, run end to end with a recorder attached.

use agora_books::Recorder;
use agora_core::agent::{Agent, Role};
use agora_core::facility::Facility;
use agora_core::loader::{
    AgentRegistry, LoadError, from_config, load_scenario_json, load_scenario_toml,
};
use agora_core::market::Market;
use agora_core::test_utils::Relay;

const DAIRY: &str = r#"{
    "engine": { "start": 100, "duration": 24, "step": 2 },
    "prototypes": {
        "market": { "kind": "market", "config": { "shuffle": true, "seed": 42 } },
        "farm": { "kind": "facility", "config": {
            "out_commod": "milk", "out_units": "milk", "out_size": 5, "create_rate": 5 } },
        "cheesery": { "kind": "facility", "config": {
            "in_commod": "milk", "in_units": "milk", "in_size": 5,
            "out_commod": "cheese", "out_units": "cheese", "out_size": 5,
            "convert_amt": 5, "convert_period": 4 } },
        "shop": { "kind": "facility", "config": {
            "in_commod": "cheese", "in_units": "cheese", "in_size": 1000 } },
        "region": { "kind": "relay" }
    },
    "agents": [
        { "id": "milk-market", "prototype": "market", "service": "milk" },
        { "id": "cheese-market", "prototype": "market", "service": "cheese" },
        { "id": "north", "prototype": "region" },
        { "id": "farm", "prototype": "farm", "parent": "north" },
        { "id": "cheesery", "prototype": "cheesery", "parent": "north" },
        { "id": "shop", "prototype": "shop" }
    ]
}"#;

fn registry() -> AgentRegistry {
    let mut registry = AgentRegistry::with_builtins();
    registry.register("relay", |_| Ok(Box::new(Relay) as Box<dyn Agent>));
    registry
}

#[test]
fn loaded_scenario_runs_and_records() {
    let mut scenario = load_scenario_json(DAIRY, &registry()).unwrap();
    let shop = scenario.id("shop").unwrap();
    let north = scenario.id("north").unwrap();
    let farm = scenario.id("farm").unwrap();

    assert_eq!(scenario.engine.agents().parent(farm), Some(north));
    assert_eq!(scenario.engine.roster(Role::Resolver).len(), 2);

    let recorder = Recorder::spawn(32).unwrap();
    scenario.engine.add_observer(Box::new(recorder.observer()));
    scenario.engine.run().unwrap();
    let ledger = recorder.close().unwrap();

    assert_eq!(scenario.engine.time(), 124);
    let shop_stock = scenario.engine.agent::<Facility>(shop).unwrap().inbound().qty();
    assert!(shop_stock > 0.0);
    assert!((ledger.moved("cheese") - shop_stock).abs() < 1e-6);
    assert!(ledger.messages.iter().all(|m| (100..124).contains(&m.time)));

    let mut out = Vec::new();
    ledger.dump_json(&mut out).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(
        json["transactions"].as_array().unwrap().len(),
        ledger.transactions.len()
    );
}

#[test]
fn markets_pick_up_their_config() {
    let scenario = load_scenario_json(DAIRY, &registry()).unwrap();
    let milk = scenario.engine.service("milk").unwrap();
    let market = scenario.engine.agent::<Market>(milk).unwrap();
    assert!(market.config().shuffle);
    assert_eq!(market.config().seed, 42);
}

#[test]
fn builtins_alone_do_not_know_relays() {
    let err = load_scenario_json(DAIRY, &AgentRegistry::with_builtins()).unwrap_err();
    assert!(matches!(err, LoadError::UnknownKind(ref k) if k.as_str() == "relay"));
}

#[test]
fn custom_kinds_can_reuse_config_parsing() {
    let mut registry = registry();
    registry.register("bulk-market", |value| {
        let mut config: agora_core::market::MarketConfig = from_config("bulk-market", value)?;
        config.shuffle = false;
        Ok(Box::new(Market::new(config)) as Box<dyn Agent>)
    });
    let json = r#"{
        "prototypes": { "m": { "kind": "bulk-market", "config": { "shuffle": true, "seed": 3 } } },
        "agents": [ { "id": "m", "prototype": "m", "service": "grain" } ]
    }"#;
    let scenario = load_scenario_json(json, &registry).unwrap();
    let id = scenario.engine.service("grain").unwrap();
    let market = scenario.engine.agent::<Market>(id).unwrap();
    assert!(!market.config().shuffle);
    assert_eq!(market.config().seed, 3);
}

const DAIRY_TOML: &str = r#"
[engine]
start = 100
duration = 24
step = 2

[prototypes.market]
kind = "market"
config = { shuffle = true, seed = 42 }

[prototypes.farm]
kind = "facility"
config = { out_commod = "milk", out_units = "milk", out_size = 5.0, create_rate = 5.0 }

[prototypes.shop]
kind = "facility"
config = { in_commod = "milk", in_units = "milk", in_size = 1000.0 }

[prototypes.region]
kind = "relay"

[[agents]]
id = "milk-market"
prototype = "market"
service = "milk"

[[agents]]
id = "north"
prototype = "region"

[[agents]]
id = "farm"
prototype = "farm"
parent = "north"

[[agents]]
id = "shop"
prototype = "shop"
"#;

#[test]
fn toml_scenario_trades_through_the_relay() {
    let mut scenario = load_scenario_toml(DAIRY_TOML, &registry()).unwrap();
    let shop = scenario.id("shop").unwrap();
    scenario.engine.run().unwrap();

    // 12 periods; the farm's first batch is offered one period after creation.
    let stock = scenario.engine.agent::<Facility>(shop).unwrap().inbound().qty();
    assert!((stock - 55.0).abs() < 1e-6, "{stock}");
}
