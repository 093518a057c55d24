//! Agents, their roles, and the table that owns them.
//!
//! Every simulation participant implements [`Agent`]. Which phases it takes
//! part in is declared through the `as_*` capability accessors: an agent
//! returns `Some(self)` from [`Agent::as_ticker`] only if it implements
//! [`Ticker`], and so on, so role membership is checked by the compiler and
//! read once by [`Engine::register_all`](crate::engine::Engine::register_all).
//!
//! The [`AgentTable`] is an arena keyed by [`AgentId`]. Parent links are
//! stored beside each slot and are only used for message routing. While an
//! agent's callback runs its behaviour is checked out of the table; anything
//! that tries to reach it in the meantime gets [`RoutingError::AgentBusy`].

use std::any::Any;
use std::fmt;

use slotmap::SlotMap;

use crate::context::Context;
use crate::engine::EngineError;
use crate::error::SimError;
use crate::id::AgentId;
use crate::message::{Message, RoutingError};
use crate::transaction::{Requester, Supplier};

// ---------------------------------------------------------------------------
// Role traits
// ---------------------------------------------------------------------------

/// Acts first in every period.
pub trait Ticker {
    fn tick(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError>;
}

/// Acts second in every period; markets clear here.
pub trait Resolver {
    fn resolve(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError>;
}

/// Acts last in every period.
pub trait Tocker {
    fn tock(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError>;
}

/// One-time setup before the first period.
pub trait Starter {
    fn start(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError>;
}

/// One-time teardown after the last period.
pub trait Ender {
    fn end(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError>;
}

/// The scheduling roles an agent can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Role {
    Ticker,
    Resolver,
    Tocker,
    Starter,
    Ender,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Ticker => "Ticker",
            Role::Resolver => "Resolver",
            Role::Tocker => "Tocker",
            Role::Starter => "Starter",
            Role::Ender => "Ender",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Agent trait
// ---------------------------------------------------------------------------

/// A simulation participant.
///
/// Only [`receive`](Agent::receive) and the `Any` accessors are required.
/// The capability accessors default to `None`.
pub trait Agent: fmt::Debug + Any {
    /// Handle a message that has just been routed to this agent. The handler
    /// may forward it with [`Context::send_on`].
    fn receive(&mut self, msg: Message, ctx: &mut Context<'_>) -> Result<(), SimError>;

    fn as_ticker(&mut self) -> Option<&mut dyn Ticker> {
        None
    }

    fn as_resolver(&mut self) -> Option<&mut dyn Resolver> {
        None
    }

    fn as_tocker(&mut self) -> Option<&mut dyn Tocker> {
        None
    }

    fn as_starter(&mut self) -> Option<&mut dyn Starter> {
        None
    }

    fn as_ender(&mut self) -> Option<&mut dyn Ender> {
        None
    }

    fn as_supplier(&mut self) -> Option<&mut dyn Supplier> {
        None
    }

    fn as_requester(&mut self) -> Option<&mut dyn Requester> {
        None
    }

    /// Downcast to `&dyn Any` for type-safe access to concrete agent types.
    fn as_any(&self) -> &dyn Any;

    /// Downcast to `&mut dyn Any` for type-safe mutable access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The scheduling roles `agent` satisfies, in phase order.
pub fn roles_of(agent: &mut dyn Agent) -> Vec<Role> {
    let mut roles = Vec::new();
    if agent.as_ticker().is_some() {
        roles.push(Role::Ticker);
    }
    if agent.as_resolver().is_some() {
        roles.push(Role::Resolver);
    }
    if agent.as_tocker().is_some() {
        roles.push(Role::Tocker);
    }
    if agent.as_starter().is_some() {
        roles.push(Role::Starter);
    }
    if agent.as_ender().is_some() {
        roles.push(Role::Ender);
    }
    roles
}

// ---------------------------------------------------------------------------
// Agent table
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AgentSlot {
    name: String,
    parent: Option<AgentId>,
    /// `None` while the agent is checked out for a callback.
    agent: Option<Box<dyn Agent>>,
}

/// Arena of agents with their names and parent links.
#[derive(Debug, Default)]
pub struct AgentTable {
    slots: SlotMap<AgentId, AgentSlot>,
}

impl AgentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, agent: Box<dyn Agent>) -> AgentId {
        self.slots.insert(AgentSlot {
            name: name.into(),
            parent: None,
            agent: Some(agent),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    /// Ids of all agents, in insertion order for a table that never had
    /// removals.
    pub fn ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.slots.keys()
    }

    pub fn name(&self, id: AgentId) -> Option<&str> {
        self.slots.get(id).map(|s| s.name.as_str())
    }

    /// Look up an agent by its symbolic name.
    pub fn find(&self, name: &str) -> Option<AgentId> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.name == name)
            .map(|(id, _)| id)
    }

    pub fn parent(&self, id: AgentId) -> Option<AgentId> {
        self.slots.get(id).and_then(|s| s.parent)
    }

    /// Link `child` under `parent`, or detach it with `None`. Links that
    /// would close a loop in the hierarchy are rejected.
    pub fn set_parent(&mut self, child: AgentId, parent: Option<AgentId>) -> Result<(), EngineError> {
        if !self.contains(child) {
            return Err(EngineError::UnknownAgent(child));
        }
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(EngineError::UnknownAgent(parent));
            }
            let mut cursor = Some(parent);
            while let Some(ancestor) = cursor {
                if ancestor == child {
                    return Err(EngineError::ParentCycle { child, parent });
                }
                cursor = self.parent(ancestor);
            }
        }
        self.slots[child].parent = parent;
        Ok(())
    }

    /// Whether the agent is currently checked out for a callback.
    pub fn is_busy(&self, id: AgentId) -> bool {
        self.slots.get(id).is_some_and(|s| s.agent.is_none())
    }

    /// Borrow a concrete agent. `None` if unknown, busy, or of another type.
    pub fn downcast_ref<T: Agent>(&self, id: AgentId) -> Option<&T> {
        self.slots
            .get(id)?
            .agent
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Mutably borrow a concrete agent. `None` if unknown, busy, or of
    /// another type.
    pub fn downcast_mut<T: Agent>(&mut self, id: AgentId) -> Option<&mut T> {
        self.slots
            .get_mut(id)?
            .agent
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// The boxed agent, if present and not checked out.
    pub(crate) fn slot_mut(&mut self, id: AgentId) -> Option<&mut Box<dyn Agent>> {
        self.slots.get_mut(id)?.agent.as_mut()
    }

    /// Take an agent out of the table for the duration of a callback.
    pub(crate) fn check_out(&mut self, id: AgentId) -> Result<Box<dyn Agent>, RoutingError> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(RoutingError::UnknownAgent(id))?;
        slot.agent.take().ok_or(RoutingError::AgentBusy(id))
    }

    /// Return an agent previously taken with [`check_out`](Self::check_out).
    pub(crate) fn check_in(&mut self, id: AgentId, agent: Box<dyn Agent>) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.agent = Some(agent);
        }
    }
}
