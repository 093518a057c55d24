//! Property-based tests for the Agora core.
//!
//! Uses proptest to generate random inventories, order books and
//! hierarchies, then verify conservation and routing invariants hold.

use agora_core::buffer::Buffer;
use agora_core::engine::{Engine, EngineConfig};
use agora_core::id::AgentId;
use agora_core::market::Market;
use agora_core::message::{Direction, Message};
use agora_core::resource::{EPS, Generic};
use agora_core::test_utils::*;
use proptest::prelude::*;
use slotmap::SlotMap;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_quantities(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(0.01f64..50.0, 1..=max_len)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6 * (1.0 + a.abs().max(b.abs()))
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Popping by quantity removes exactly that much and keeps the rest.
    #[test]
    fn pop_qty_conserves(quantities in arb_quantities(20), fraction in 0.0f64..=1.0) {
        let mut buffer = Buffer::unlimited();
        for q in &quantities {
            buffer.push(Generic::boxed(*q, "milk")).unwrap();
        }
        let total = buffer.qty();
        let take = total * fraction;
        prop_assume!(take >= EPS);

        let popped = buffer.pop_qty(take).unwrap();
        let popped_qty: f64 = popped.iter().map(|r| r.qty()).sum();
        prop_assert!(close(popped_qty, take), "popped {} wanted {}", popped_qty, take);
        prop_assert!(close(buffer.qty() + popped_qty, total));
    }

    /// No sequence of pushes takes a buffer over its capacity.
    #[test]
    fn pushes_respect_capacity(capacity in 1.0f64..100.0, quantities in arb_quantities(30)) {
        let mut buffer = Buffer::new(capacity);
        for q in quantities {
            let before = buffer.qty();
            match buffer.push(Generic::boxed(q, "milk")) {
                Ok(()) => prop_assert!(close(buffer.qty(), before + q)),
                Err(_) => prop_assert!(close(buffer.qty(), before)),
            }
            prop_assert!(buffer.qty() <= capacity + EPS);
        }
    }

    /// Greedy clearing matches min(total offered, total requested) and
    /// always empties both queues.
    #[test]
    fn clearing_matches_the_smaller_side(
        offers in arb_quantities(8),
        requests in arb_quantities(8),
    ) {
        let mut engine = engine(1);
        let mkt = add_market(&mut engine, "milk");
        let log = TraderLog::default();
        for (i, q) in offers.iter().enumerate() {
            engine.register_all(format!("o{i}"), Box::new(Trader::offering(Generic::new(*q, "milk"), "milk", &log)));
        }
        for (i, q) in requests.iter().enumerate() {
            engine.register_all(format!("r{i}"), Box::new(Trader::requesting(Generic::new(*q, "milk"), "milk", &log)));
        }
        engine.step().unwrap();

        let offered: f64 = offers.iter().sum();
        let requested: f64 = requests.iter().sum();
        let expected = offered.min(requested);
        // Each match may absorb up to EPS of slack.
        let slack = EPS * (offers.len() + requests.len()) as f64 * 2.0;
        prop_assert!((log.total_qty() - expected).abs() <= slack + 1e-9 * expected,
            "matched {} expected {}", log.total_qty(), expected);

        let market = engine.agent::<Market>(mkt).unwrap();
        prop_assert_eq!(market.pending_offers(), 0);
        prop_assert_eq!(market.pending_requests(), 0);
    }

    /// A message sent Up through any parent chain comes back Down to its
    /// sender along the same path.
    #[test]
    fn down_retraces_any_chain(depth in 0usize..10) {
        let mut ids: SlotMap<AgentId, ()> = SlotMap::with_key();
        let chain: Vec<_> = (0..=depth).map(|_| ids.insert(())).collect();
        let receiver = ids.insert(());
        let parent_of = |id: AgentId| chain.iter().position(|c| *c == id).and_then(|i| chain.get(i + 1).copied());

        let mut msg = Message::new(chain[0], receiver);
        let mut up = vec![chain[0]];
        while msg.owner() != receiver {
            up.push(msg.route(parent_of).unwrap());
        }
        prop_assert_eq!(msg.path(), up.as_slice());

        msg.set_direction(Direction::Down);
        let mut down = vec![receiver];
        while msg.owner() != chain[0] {
            down.push(msg.route(parent_of).unwrap());
        }
        down.reverse();
        prop_assert_eq!(down, up);
        prop_assert_eq!(msg.path(), &[chain[0]]);
    }

    /// A run lasting n steps invokes every phase n times.
    #[test]
    fn duration_over_step_periods(step in 1u64..1000, periods in 0u64..20) {
        let mut engine = Engine::new(EngineConfig::periods(step, periods)).unwrap();
        let log = ProbeLog::default();
        engine.register_all("p", Box::new(Probe::new("p", &log)));
        engine.run().unwrap();
        prop_assert_eq!(log.count("p:tick") as u64, periods);
        prop_assert_eq!(log.count("p:tock") as u64, periods);
        prop_assert_eq!(log.count("p:end"), 1);
    }
}
