//! The handle agents use to act on the simulation from inside a callback.
//!
//! A [`Context`] is built by the engine for each callback and for each
//! message delivery. It carries the current time, the id of the agent being
//! called, and mutable access to every *other* agent, which is what lets a
//! market send a matched offer back down to a facility while the market
//! itself is running.

use std::collections::HashMap;

use crate::agent::{Agent, AgentTable};
use crate::engine::EngineError;
use crate::error::SimError;
use crate::id::AgentId;
use crate::message::Message;
use crate::observer::Observer;
use crate::sim::{Clock, Ticks};
use crate::transaction::{Counterparties, Requester, Supplier, Transaction, TransactionError};

/// Callback-scoped access to the engine.
pub struct Context<'a> {
    agents: &'a mut AgentTable,
    services: &'a HashMap<String, AgentId>,
    observers: &'a mut [Box<dyn Observer>],
    clock: Clock,
    current: AgentId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        agents: &'a mut AgentTable,
        services: &'a HashMap<String, AgentId>,
        observers: &'a mut [Box<dyn Observer>],
        clock: Clock,
        current: AgentId,
    ) -> Self {
        Self {
            agents,
            services,
            observers,
            clock,
            current,
        }
    }

    /// The agent this callback belongs to.
    pub fn id(&self) -> AgentId {
        self.current
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Absolute current time.
    pub fn time(&self) -> Ticks {
        self.clock.time()
    }

    pub fn since_start(&self) -> Ticks {
        self.clock.since_start()
    }

    pub fn name_of(&self, id: AgentId) -> Option<&str> {
        self.agents.name(id)
    }

    pub fn parent_of(&self, id: AgentId) -> Option<AgentId> {
        self.agents.parent(id)
    }

    /// Look up the agent registered under a service name.
    pub fn service(&self, name: &str) -> Result<AgentId, EngineError> {
        self.services
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::ServiceNotFound(name.to_string()))
    }

    /// Route `msg` one hop and deliver it to the new owner.
    ///
    /// Observers see the message after routing and before the receiver's
    /// `receive` runs. Delivery is synchronous: when this returns, the whole
    /// chain of forwards the receiver triggered has completed.
    pub fn send_on(&mut self, mut msg: Message) -> Result<(), SimError> {
        let agents = &*self.agents;
        let next = msg.route(|id| agents.parent(id))?;
        tracing::trace!(
            from = ?msg.prev_owner(),
            to = ?next,
            direction = ?msg.direction(),
            "message hop"
        );

        let now = self.clock.time();
        for observer in self.observers.iter_mut() {
            observer.msg_notify(&msg, now);
        }
        self.deliver(next, msg)
    }

    fn deliver(&mut self, to: AgentId, msg: Message) -> Result<(), SimError> {
        let mut agent = self.agents.check_out(to)?;
        let result = {
            let mut ctx = Context::new(
                &mut *self.agents,
                self.services,
                &mut *self.observers,
                self.clock,
                to,
            );
            agent.receive(msg, &mut ctx)
        };
        self.agents.check_in(to, agent);
        result
    }

    /// Approve a matched transaction on behalf of the current agent.
    ///
    /// `me` must be the agent this context belongs to; it is checked out of
    /// the table while its callback runs, so it is passed in directly. Any
    /// other party is looked up in the table.
    pub fn approve(&mut self, tx: &mut Transaction, me: &mut dyn Agent) -> Result<(), SimError> {
        let now = self.clock.time();
        let mut parties = Parties {
            me_id: self.current,
            me,
            agents: &mut *self.agents,
        };
        tx.approve(&mut parties, &mut *self.observers, now)?;
        Ok(())
    }
}

/// Resolves transaction parties to agents, special-casing the caller.
struct Parties<'p> {
    me_id: AgentId,
    me: &'p mut dyn Agent,
    agents: &'p mut AgentTable,
}

impl Counterparties for Parties<'_> {
    fn supplier(&mut self, id: AgentId) -> Result<&mut dyn Supplier, TransactionError> {
        if id == self.me_id {
            return self.me.as_supplier().ok_or(TransactionError::NotASupplier(id));
        }
        self.agents
            .slot_mut(id)
            .ok_or(TransactionError::PartyUnavailable(id))?
            .as_supplier()
            .ok_or(TransactionError::NotASupplier(id))
    }

    fn requester(&mut self, id: AgentId) -> Result<&mut dyn Requester, TransactionError> {
        if id == self.me_id {
            return self.me.as_requester().ok_or(TransactionError::NotARequester(id));
        }
        self.agents
            .slot_mut(id)
            .ok_or(TransactionError::PartyUnavailable(id))?
            .as_requester()
            .ok_or(TransactionError::NotARequester(id))
    }
}
