//! Observation hooks for messages and approved transactions.
//!
//! Observers are handed to the engine explicitly and live for one run. They
//! are notified synchronously: the simulation does not continue until the
//! callback returns, so a slow observer slows the run down.

use crate::message::Message;
use crate::sim::Ticks;
use crate::transaction::Transaction;

/// Receives notifications for every message hop and every approval.
///
/// All methods default to no-ops so observers implement only what they need.
pub trait Observer {
    /// Called on every [`Message`] hop, after routing and before the new
    /// owner receives it. `now` is the absolute simulation time.
    fn msg_notify(&mut self, msg: &Message, now: Ticks) {
        let _ = (msg, now);
    }

    /// Called once per approved transaction, after both transfer callbacks
    /// succeeded.
    fn trans_notify(&mut self, tx: &Transaction, now: Ticks) {
        let _ = (tx, now);
    }

    /// Called once after the run's enders. Observers flush here.
    fn end(&mut self) {}
}
