//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and, through the `test-utils` feature, in the
//! integration test crate.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::agent::{Agent, Ender, Resolver, Starter, Ticker, Tocker};
use crate::context::Context;
use crate::engine::{Engine, EngineConfig};
use crate::error::SimError;
use crate::facility::{Facility, FacilityConfig};
use crate::id::AgentId;
use crate::market::{Market, MarketConfig};
use crate::message::{Direction, Message};
use crate::observer::Observer;
use crate::resource::{Generic, Quantity};
use crate::sim::Ticks;
use crate::transaction::Transaction;

// ===========================================================================
// Engine helpers
// ===========================================================================

/// An engine running `periods` periods of one tick each.
pub fn engine(periods: u64) -> Engine {
    Engine::new(EngineConfig::periods(1, periods)).expect("step is non-zero")
}

/// Register an arrival-order market and publish it under `commod`.
pub fn add_market(engine: &mut Engine, commod: &str) -> AgentId {
    let id = engine
        .register_all(commod, Box::new(Market::new(MarketConfig::default())))
        .id;
    engine
        .register_service(commod, id)
        .expect("commodity registered once");
    id
}

pub fn add_facility(engine: &mut Engine, name: &str, config: FacilityConfig) -> AgentId {
    engine.register_all(name, Box::new(Facility::new(config))).id
}

/// Inbound quantity of a facility.
pub fn held_in(engine: &Engine, id: AgentId) -> Quantity {
    engine
        .agent::<Facility>(id)
        .expect("agent is a facility")
        .inbound()
        .qty()
}

/// Outbound quantity of a facility.
pub fn held_out(engine: &Engine, id: AgentId) -> Quantity {
    engine
        .agent::<Facility>(id)
        .expect("agent is a facility")
        .outbound()
        .qty()
}

// ===========================================================================
// Probe: records every callback
// ===========================================================================

/// Shared log of `"<name>:<event>@<time>"` entries.
#[derive(Debug, Clone, Default)]
pub struct ProbeLog(Rc<RefCell<Vec<String>>>);

impl ProbeLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Number of entries starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.0.borrow().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, name: &str, event: &str, now: Ticks) {
        self.0.borrow_mut().push(format!("{name}:{event}@{now}"));
    }
}

/// An agent that takes every role and logs each callback.
#[derive(Debug)]
pub struct Probe {
    name: String,
    log: ProbeLog,
    target: Option<AgentId>,
}

impl Probe {
    pub fn new(name: &str, log: &ProbeLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send an empty message to `target` on every tick.
    pub fn send_to(&mut self, target: AgentId) {
        self.target = Some(target);
    }
}

impl Starter for Probe {
    fn start(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.log.push(&self.name, "start", ctx.time());
        Ok(())
    }
}

impl Ticker for Probe {
    fn tick(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.log.push(&self.name, "tick", ctx.time());
        if let Some(target) = self.target {
            ctx.send_on(Message::new(ctx.id(), target))?;
        }
        Ok(())
    }
}

impl Resolver for Probe {
    fn resolve(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.log.push(&self.name, "resolve", ctx.time());
        Ok(())
    }
}

impl Tocker for Probe {
    fn tock(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.log.push(&self.name, "tock", ctx.time());
        Ok(())
    }
}

impl Ender for Probe {
    fn end(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.log.push(&self.name, "end", ctx.time());
        Ok(())
    }
}

impl Agent for Probe {
    fn receive(&mut self, _msg: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.log.push(&self.name, "receive", ctx.time());
        Ok(())
    }

    fn as_ticker(&mut self) -> Option<&mut dyn Ticker> {
        Some(self)
    }

    fn as_resolver(&mut self) -> Option<&mut dyn Resolver> {
        Some(self)
    }

    fn as_tocker(&mut self) -> Option<&mut dyn Tocker> {
        Some(self)
    }

    fn as_starter(&mut self) -> Option<&mut dyn Starter> {
        Some(self)
    }

    fn as_ender(&mut self) -> Option<&mut dyn Ender> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Relay: an intermediate hierarchy node
// ===========================================================================

/// Forwards every message it receives one more hop.
#[derive(Debug, Default)]
pub struct Relay;

impl Agent for Relay {
    fn receive(&mut self, msg: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        ctx.send_on(msg)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Trader: posts one order per tick and records what comes back
// ===========================================================================

/// Transactions returned to traders, tagged with the receiving trader.
#[derive(Debug, Clone, Default)]
pub struct TraderLog(Rc<RefCell<Vec<(AgentId, Transaction)>>>);

impl TraderLog {
    /// Transactions returned to `trader`, in arrival order.
    pub fn matched_to(&self, trader: AgentId) -> Vec<Transaction> {
        self.0
            .borrow()
            .iter()
            .filter(|(id, _)| *id == trader)
            .map(|(_, tx)| tx.clone())
            .collect()
    }

    pub fn total_qty(&self) -> Quantity {
        self.0.borrow().iter().map(|(_, tx)| tx.qty()).sum()
    }

    /// Requesters of the returned transactions, in arrival order.
    pub fn requesters(&self) -> Vec<AgentId> {
        self.0.borrow().iter().filter_map(|(_, tx)| tx.requester()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

#[derive(Debug)]
pub struct Trader {
    order: Generic,
    offering: bool,
    commod: String,
    log: TraderLog,
    send_bare: bool,
}

impl Trader {
    pub fn offering(order: Generic, commod: &str, log: &TraderLog) -> Self {
        Self::new(order, true, commod, log)
    }

    pub fn requesting(order: Generic, commod: &str, log: &TraderLog) -> Self {
        Self::new(order, false, commod, log)
    }

    fn new(order: Generic, offering: bool, commod: &str, log: &TraderLog) -> Self {
        Self {
            order,
            offering,
            commod: commod.to_string(),
            log: log.clone(),
            send_bare: false,
        }
    }

    /// Also send a message with no transaction on the next tick.
    pub fn send_bare(&mut self) {
        self.send_bare = true;
    }
}

impl Ticker for Trader {
    fn tick(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let market = ctx.service(&self.commod)?;
        let tx = if self.offering {
            Transaction::offer(ctx.id(), &self.order)
        } else {
            Transaction::request(ctx.id(), &self.order)
        };
        ctx.send_on(Message::new(ctx.id(), market).with_transaction(tx))?;
        if self.send_bare {
            self.send_bare = false;
            ctx.send_on(Message::new(ctx.id(), market))?;
        }
        Ok(())
    }
}

impl Agent for Trader {
    fn receive(&mut self, msg: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if msg.direction() == Direction::Down {
            if let Some(tx) = msg.transaction() {
                self.log.0.borrow_mut().push((ctx.id(), tx.clone()));
            }
        }
        Ok(())
    }

    fn as_ticker(&mut self) -> Option<&mut dyn Ticker> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Observer helpers
// ===========================================================================

/// Counts notifications; the counters stay readable after the observer is
/// handed to an engine.
#[derive(Debug, Clone, Default)]
pub struct CountingObserver {
    pub hops: Rc<RefCell<Vec<(AgentId, Direction)>>>,
    pub approvals: Rc<RefCell<Vec<Quantity>>>,
    pub ended: Rc<RefCell<u32>>,
}

impl Observer for CountingObserver {
    fn msg_notify(&mut self, msg: &Message, _now: Ticks) {
        self.hops.borrow_mut().push((msg.owner(), msg.direction()));
    }

    fn trans_notify(&mut self, tx: &Transaction, _now: Ticks) {
        self.approvals.borrow_mut().push(tx.manifest_qty());
    }

    fn end(&mut self) {
        *self.ended.borrow_mut() += 1;
    }
}
