//! Agora Core -- a discrete-time, agent-based simulation kernel for
//! resource-exchange economies.
//!
//! Agents (producers, consumers, markets, hierarchy nodes) exchange fungible
//! resources by posting offers and requests to markets. Markets match them
//! greedily once per period and send the matches back, and the parties then
//! settle the transfer by approving the transaction.
//!
//! # Period loop
//!
//! [`engine::Engine::run`] runs every starter once, then for each period:
//!
//! 1. **Tick** -- agents post offers and requests.
//! 2. **Resolve** -- markets match what they received and return matches.
//! 3. **Tock** -- agents approve matches and move resources between buffers.
//!
//! and finally every ender, followed by the observers' `end` hooks.
//!
//! # Messages
//!
//! A [`message::Message`] climbs the sender's parent chain on its way to the
//! receiver and retraces the exact same path when turned Down. Each hop is
//! delivered synchronously through [`context::Context::send_on`].
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- owns agents, rosters, services, observers, clock.
//! - [`agent::Agent`] -- the agent trait and its role capabilities.
//! - [`transaction::Transaction`] -- offer/request state machine.
//! - [`buffer::Buffer`] -- capacity-bounded FIFO resource store.
//! - [`market::Market`] -- greedy first-come-first-served matcher.
//! - [`facility::Facility`] -- reference producer/converter/consumer.
//! - [`loader`] -- JSON, TOML and RON scenarios (feature `scenario-loader`).

pub mod agent;
pub mod buffer;
pub mod context;
pub mod engine;
pub mod error;
pub mod facility;
pub mod id;
#[cfg(feature = "scenario-loader")]
pub mod loader;
pub mod market;
pub mod message;
pub mod observer;
pub mod resource;
pub mod rng;
pub mod sim;
pub mod transaction;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
