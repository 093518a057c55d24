//! The simulation engine: owns every agent and drives the period loop.
//!
//! # Architecture
//!
//! The `Engine` owns:
//! - An [`AgentTable`] (agents, their names, and parent links)
//! - One ordered roster per scheduling [`Role`]
//! - A service directory mapping well-known names (usually commodity names)
//!   to agent ids
//! - The run's [`Observer`]s
//! - The run's [`Clock`]
//!
//! # Period loop
//!
//! [`Engine::run`] first runs every [`Starter`](crate::agent::Starter) once,
//! then repeats, while `elapsed < duration`:
//! 1. **Tick** -- every ticker, in registration order
//! 2. **Resolve** -- every resolver (markets clear here)
//! 3. **Tock** -- every tocker (facilities approve and produce here)
//! 4. **Advance** -- the clock moves forward by one step
//!
//! After the last period every [`Ender`](crate::agent::Ender) runs once,
//! then every observer's `end` hook.

use std::collections::HashMap;
use std::fmt;

use crate::agent::{Agent, AgentTable, Role, roles_of};
use crate::context::Context;
use crate::error::SimError;
use crate::id::AgentId;
use crate::observer::Observer;
use crate::sim::{Clock, Ticks};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Configuration and directory errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("step must be greater than zero")]
    ZeroStep,
    #[error("duplicate service id '{0}'")]
    DuplicateService(String),
    #[error("service id '{0}' not registered")]
    ServiceNotFound(String),
    #[error("agent {0:?} is not registered")]
    UnknownAgent(AgentId),
    #[error("making {parent:?} the parent of {child:?} would create a cycle")]
    ParentCycle { child: AgentId, parent: AgentId },
    #[error("the run has already finished")]
    AlreadyFinished,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Time parameters of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute time of period 0.
    pub start: Ticks,
    /// Total length of the run.
    pub duration: Ticks,
    /// Length of one period. Must be non-zero.
    pub step: Ticks,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start: 0,
            duration: 0,
            step: 1,
        }
    }
}

impl EngineConfig {
    /// A run of `periods` periods of length `step`, starting at time zero.
    /// The duration saturates at `Ticks::MAX`.
    pub fn periods(step: Ticks, periods: u64) -> Self {
        Self {
            start: 0,
            duration: step.saturating_mul(periods),
            step,
        }
    }
}

/// Result of [`Engine::register_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: AgentId,
    /// Roles the agent was scheduled under, in phase order.
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Tick,
    Resolve,
    Tock,
    End,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The discrete-time simulation engine.
pub struct Engine {
    config: EngineConfig,
    clock: Clock,
    agents: AgentTable,
    services: HashMap<String, AgentId>,

    // -- Rosters, in registration order --
    starters: Vec<AgentId>,
    tickers: Vec<AgentId>,
    resolvers: Vec<AgentId>,
    tockers: Vec<AgentId>,
    enders: Vec<AgentId>,

    observers: Vec<Box<dyn Observer>>,

    started: bool,
    finished: bool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("agents", &self.agents.len())
            .field("services", &self.services)
            .field("observers", &self.observers.len())
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine. Fails if `config.step` is zero.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        if config.step == 0 {
            return Err(EngineError::ZeroStep);
        }
        Ok(Self {
            config,
            clock: Clock::new(config.start, config.step, config.duration),
            agents: AgentTable::new(),
            services: HashMap::new(),
            starters: Vec::new(),
            tickers: Vec::new(),
            resolvers: Vec::new(),
            tockers: Vec::new(),
            enders: Vec::new(),
            observers: Vec::new(),
            started: false,
            finished: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Add an agent and schedule it under every role it implements.
    pub fn register_all(&mut self, name: impl Into<String>, mut agent: Box<dyn Agent>) -> Registration {
        let roles = roles_of(agent.as_mut());
        let name = name.into();
        let id = self.agents.insert(name.clone(), agent);
        for role in &roles {
            self.roster_mut(*role).push(id);
        }
        tracing::debug!(%name, ?id, ?roles, "registered agent");
        Registration { id, roles }
    }

    /// Link `child` under `parent` in the routing hierarchy, or detach it.
    pub fn set_parent(&mut self, child: AgentId, parent: Option<AgentId>) -> Result<(), EngineError> {
        self.agents.set_parent(child, parent)
    }

    /// Publish an agent under a well-known service name.
    pub fn register_service(&mut self, name: impl Into<String>, id: AgentId) -> Result<(), EngineError> {
        let name = name.into();
        if !self.agents.contains(id) {
            return Err(EngineError::UnknownAgent(id));
        }
        if self.services.contains_key(&name) {
            return Err(EngineError::DuplicateService(name));
        }
        self.services.insert(name, id);
        Ok(())
    }

    pub fn service(&self, name: &str) -> Result<AgentId, EngineError> {
        self.services
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::ServiceNotFound(name.to_string()))
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Agents scheduled under `role`, in registration order.
    pub fn roster(&self, role: Role) -> &[AgentId] {
        match role {
            Role::Starter => &self.starters,
            Role::Ticker => &self.tickers,
            Role::Resolver => &self.resolvers,
            Role::Tocker => &self.tockers,
            Role::Ender => &self.enders,
        }
    }

    fn roster_mut(&mut self, role: Role) -> &mut Vec<AgentId> {
        match role {
            Role::Starter => &mut self.starters,
            Role::Ticker => &mut self.tickers,
            Role::Resolver => &mut self.resolvers,
            Role::Tocker => &mut self.tockers,
            Role::Ender => &mut self.enders,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn agents(&self) -> &AgentTable {
        &self.agents
    }

    /// Borrow a concrete agent by id.
    pub fn agent<T: Agent>(&self, id: AgentId) -> Option<&T> {
        self.agents.downcast_ref::<T>(id)
    }

    /// Mutably borrow a concrete agent by id.
    pub fn agent_mut<T: Agent>(&mut self, id: AgentId) -> Option<&mut T> {
        self.agents.downcast_mut::<T>(id)
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

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Run the simulation to completion: starters, every period, enders,
    /// then observer `end` hooks. The first error aborts the run.
    pub fn run(&mut self) -> Result<(), SimError> {
        if self.finished {
            return Err(EngineError::AlreadyFinished.into());
        }
        tracing::debug!(
            start = self.config.start,
            duration = self.config.duration,
            step = self.config.step,
            agents = self.agents.len(),
            "simulation starting"
        );
        while self.step()? {}

        self.run_phase(Phase::End)?;
        for observer in &mut self.observers {
            observer.end();
        }
        self.finished = true;
        tracing::debug!(time = self.clock.time(), "simulation finished");
        Ok(())
    }

    /// Run a single period. Starters run before the first one.
    ///
    /// Returns `false` without doing anything once the duration is used up.
    pub fn step(&mut self) -> Result<bool, SimError> {
        if self.finished {
            return Err(EngineError::AlreadyFinished.into());
        }
        if !self.started {
            self.started = true;
            self.run_phase(Phase::Start)?;
        }
        if !self.clock.is_running() {
            return Ok(false);
        }

        tracing::debug!(
            period = self.clock.period(),
            time = self.clock.time(),
            "period begins"
        );
        self.run_phase(Phase::Tick)?;
        self.run_phase(Phase::Resolve)?;
        self.run_phase(Phase::Tock)?;
        self.clock.advance();
        Ok(true)
    }

    fn run_phase(&mut self, phase: Phase) -> Result<(), SimError> {
        let roster = match phase {
            Phase::Start => self.starters.clone(),
            Phase::Tick => self.tickers.clone(),
            Phase::Resolve => self.resolvers.clone(),
            Phase::Tock => self.tockers.clone(),
            Phase::End => self.enders.clone(),
        };
        tracing::trace!(?phase, agents = roster.len(), "phase");

        for id in roster {
            self.with_agent(id, |agent, ctx| match phase {
                Phase::Start => agent.as_starter().map_or(Ok(()), |a| a.start(ctx)),
                Phase::Tick => agent.as_ticker().map_or(Ok(()), |a| a.tick(ctx)),
                Phase::Resolve => agent.as_resolver().map_or(Ok(()), |a| a.resolve(ctx)),
                Phase::Tock => agent.as_tocker().map_or(Ok(()), |a| a.tock(ctx)),
                Phase::End => agent.as_ender().map_or(Ok(()), |a| a.end(ctx)),
            })?;
        }
        Ok(())
    }

    /// Check an agent out, hand it a context, and put it back.
    fn with_agent<F>(&mut self, id: AgentId, f: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut dyn Agent, &mut Context<'_>) -> Result<(), SimError>,
    {
        let mut agent = self.agents.check_out(id)?;
        let result = {
            let mut ctx = Context::new(
                &mut self.agents,
                &self.services,
                &mut self.observers,
                self.clock,
                id,
            );
            f(agent.as_mut(), &mut ctx)
        };
        self.agents.check_in(id, agent);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RoutingError;
    use crate::test_utils::{Probe, ProbeLog, Relay};

    fn engine(periods: u64) -> Engine {
        Engine::new(EngineConfig::periods(10, periods)).unwrap()
    }

    #[test]
    fn zero_step_is_rejected() {
        let config = EngineConfig {
            step: 0,
            ..EngineConfig::default()
        };
        assert_eq!(Engine::new(config).unwrap_err(), EngineError::ZeroStep);
    }

    #[test]
    fn register_all_reports_roles() {
        let mut engine = engine(1);
        let log = ProbeLog::default();
        let reg = engine.register_all("probe", Box::new(Probe::new("p", &log)));
        assert_eq!(
            reg.roles,
            vec![Role::Ticker, Role::Resolver, Role::Tocker, Role::Starter, Role::Ender]
        );
        assert_eq!(engine.roster(Role::Ticker), &[reg.id]);

        let relay = engine.register_all("relay", Box::new(Relay));
        assert!(relay.roles.is_empty());
    }

    #[test]
    fn each_period_is_tick_resolve_tock() {
        let mut engine = engine(2);
        let log = ProbeLog::default();
        engine.register_all("a", Box::new(Probe::new("a", &log)));
        engine.register_all("b", Box::new(Probe::new("b", &log)));
        engine.run().unwrap();

        let expected: Vec<String> = [
            "a:start@0", "b:start@0",
            "a:tick@0", "b:tick@0", "a:resolve@0", "b:resolve@0", "a:tock@0", "b:tock@0",
            "a:tick@10", "b:tick@10", "a:resolve@10", "b:resolve@10", "a:tock@10", "b:tock@10",
            "a:end@20", "b:end@20",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(log.entries(), expected);
    }

    #[test]
    fn three_steps_of_duration_run_three_periods() {
        let mut engine = engine(3);
        let log = ProbeLog::default();
        engine.register_all("p", Box::new(Probe::new("p", &log)));
        engine.run().unwrap();

        assert_eq!(log.count("p:tick"), 3);
        assert_eq!(log.count("p:resolve"), 3);
        assert_eq!(log.count("p:tock"), 3);
        assert_eq!(log.count("p:start"), 1);
        assert_eq!(log.count("p:end"), 1);
        assert_eq!(engine.since_start(), 30);
    }

    #[test]
    fn zero_duration_runs_only_starters_and_enders() {
        let mut engine = engine(0);
        let log = ProbeLog::default();
        engine.register_all("p", Box::new(Probe::new("p", &log)));
        engine.run().unwrap();
        assert_eq!(log.entries(), vec!["p:start@0".to_string(), "p:end@0".to_string()]);
    }

    #[test]
    fn run_twice_is_an_error() {
        let mut engine = engine(1);
        engine.run().unwrap();
        assert!(matches!(
            engine.run().unwrap_err(),
            SimError::Engine(EngineError::AlreadyFinished)
        ));
    }

    #[test]
    fn start_time_offsets_absolute_time() {
        let config = EngineConfig {
            start: 100,
            duration: 20,
            step: 10,
        };
        let mut engine = Engine::new(config).unwrap();
        let log = ProbeLog::default();
        engine.register_all("p", Box::new(Probe::new("p", &log)));
        engine.run().unwrap();
        assert!(log.entries().contains(&"p:tick@110".to_string()));
        assert_eq!(engine.time(), 120);
    }

    #[test]
    fn services_are_unique_and_must_exist() {
        let mut engine = engine(1);
        let relay = engine.register_all("relay", Box::new(Relay)).id;
        engine.register_service("milk", relay).unwrap();
        assert_eq!(engine.service("milk").unwrap(), relay);
        assert_eq!(
            engine.register_service("milk", relay).unwrap_err(),
            EngineError::DuplicateService("milk".into())
        );
        assert_eq!(
            engine.service("cheese").unwrap_err(),
            EngineError::ServiceNotFound("cheese".into())
        );
    }

    #[test]
    fn agent_downcast_by_id() {
        let mut engine = engine(1);
        let log = ProbeLog::default();
        let id = engine.register_all("p", Box::new(Probe::new("p", &log))).id;
        assert_eq!(engine.agent::<Probe>(id).unwrap().name(), "p");
        assert!(engine.agent::<Relay>(id).is_none());
    }

    #[test]
    fn probe_messages_reach_receiver_during_tick() {
        let mut engine = engine(1);
        let log = ProbeLog::default();
        let a = engine.register_all("a", Box::new(Probe::new("a", &log))).id;
        let b = engine.register_all("b", Box::new(Probe::new("b", &log))).id;
        engine.agent_mut::<Probe>(a).unwrap().send_to(b);
        engine.run().unwrap();
        assert_eq!(log.count("b:receive"), 1);
    }

    #[test]
    fn message_to_busy_agent_fails_the_run() {
        // A probe that messages itself through a relay re-enters itself.
        let mut engine = engine(1);
        let log = ProbeLog::default();
        let a = engine.register_all("a", Box::new(Probe::new("a", &log))).id;
        let relay = engine.register_all("relay", Box::new(Relay)).id;
        engine.set_parent(a, Some(relay)).unwrap();
        engine.agent_mut::<Probe>(a).unwrap().send_to(a);

        let err = engine.run().unwrap_err();
        assert!(matches!(err, SimError::Routing(RoutingError::AgentBusy(id)) if id == a));
    }

    #[test]
    fn step_by_step_matches_run() {
        let mut engine = engine(2);
        let log = ProbeLog::default();
        engine.register_all("p", Box::new(Probe::new("p", &log)));
        assert!(engine.step().unwrap());
        assert!(engine.step().unwrap());
        assert!(!engine.step().unwrap());
        assert_eq!(log.count("p:start"), 1);
        assert_eq!(log.count("p:tick"), 2);
        assert_eq!(log.count("p:end"), 0);
    }
}
