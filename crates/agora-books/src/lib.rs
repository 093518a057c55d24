//! Agora Books -- off-thread recording of a simulation's traffic.
//!
//! The engine notifies observers synchronously. A [`RecorderHandle`] turns
//! each notification into a plain record and pushes it onto a bounded
//! channel, so the simulation only pays for a copy and a channel send. A
//! dedicated worker thread drains the channel into a [`Ledger`].
//!
//! # Lifecycle
//!
//! 1. [`Recorder::spawn`] starts the worker.
//! 2. [`Recorder::observer`] hands out handles to register with the engine.
//! 3. When the run ends, each handle's `end` hook waits until the worker has
//!    consumed everything it sent.
//! 4. [`Recorder::close`] stops the worker and returns the ledger.
//!
//! Records sent after the worker has stopped are logged and dropped.

use std::io::Write;
use std::thread::{self, JoinHandle};

use agora_core::id::AgentId;
use agora_core::message::{Direction, Message};
use agora_core::observer::Observer;
use agora_core::resource::Quantity;
use agora_core::sim::Ticks;
use agora_core::transaction::{Transaction, TransactionKind};
use crossbeam_channel::{Receiver, Sender, bounded};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BooksError {
    #[error("failed to start recorder thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("recorder worker is no longer running")]
    Disconnected,
    #[error("recorder worker panicked")]
    WorkerPanicked,
    #[error("failed to write ledger: {0}")]
    Dump(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One message hop.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageRecord {
    pub time: Ticks,
    pub sender: AgentId,
    pub receiver: AgentId,
    pub owner: AgentId,
    pub prev_owner: Option<AgentId>,
    pub direction: Direction,
    /// Kind of the carried transaction, if any.
    pub kind: Option<TransactionKind>,
    pub qty: Option<Quantity>,
    pub units: Option<String>,
}

impl MessageRecord {
    pub fn from_message(msg: &Message, time: Ticks) -> Self {
        let tx = msg.transaction();
        Self {
            time,
            sender: msg.sender(),
            receiver: msg.receiver(),
            owner: msg.owner(),
            prev_owner: msg.prev_owner(),
            direction: msg.direction(),
            kind: tx.map(Transaction::kind),
            qty: tx.map(Transaction::qty),
            units: tx.map(|t| t.resource().units().to_string()),
        }
    }
}

/// One approved transaction.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransactionRecord {
    pub time: Ticks,
    pub kind: TransactionKind,
    pub supplier: Option<AgentId>,
    pub requester: Option<AgentId>,
    pub qty: Quantity,
    pub units: String,
    /// Quantity actually moved.
    pub manifest_qty: Quantity,
}

impl TransactionRecord {
    pub fn from_transaction(tx: &Transaction, time: Ticks) -> Self {
        Self {
            time,
            kind: tx.kind(),
            supplier: tx.supplier(),
            requester: tx.requester(),
            qty: tx.qty(),
            units: tx.resource().units().to_string(),
            manifest_qty: tx.manifest_qty(),
        }
    }
}

/// Everything a recorder has collected.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Ledger {
    pub messages: Vec<MessageRecord>,
    pub transactions: Vec<TransactionRecord>,
}

impl Ledger {
    /// Total quantity moved in `units` by approved transactions.
    pub fn moved(&self, units: &str) -> Quantity {
        self.transactions
            .iter()
            .filter(|t| t.units == units)
            .map(|t| t.manifest_qty)
            .sum()
    }

    /// Approved transactions supplied by `supplier`.
    pub fn supplied_by(&self, supplier: AgentId) -> impl Iterator<Item = &TransactionRecord> + '_ {
        self.transactions
            .iter()
            .filter(move |t| t.supplier == Some(supplier))
    }

    /// Serialize as pretty-printed JSON.
    pub fn dump_json<W: Write>(&self, writer: W) -> Result<(), BooksError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worker protocol
// ---------------------------------------------------------------------------

enum Command {
    Message(MessageRecord),
    Transaction(TransactionRecord),
    /// Reply once everything sent before this has been consumed.
    Flush(Sender<()>),
    /// Stop and hand back the ledger.
    Close(Sender<Ledger>),
}

fn run_worker(rx: Receiver<Command>) {
    let mut ledger = Ledger::default();
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Message(record) => ledger.messages.push(record),
            Command::Transaction(record) => ledger.transactions.push(record),
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
            Command::Close(reply) => {
                tracing::debug!(
                    messages = ledger.messages.len(),
                    transactions = ledger.transactions.len(),
                    "recorder closing"
                );
                let _ = reply.send(ledger);
                return;
            }
        }
    }
    tracing::debug!("recorder channel disconnected");
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Owns the worker thread.
pub struct Recorder {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("queued", &self.tx.len())
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl Recorder {
    /// Start the worker. `capacity` bounds the hand-off queue; a full queue
    /// makes the simulation wait for the worker.
    pub fn spawn(capacity: usize) -> Result<Self, BooksError> {
        let (tx, rx) = bounded::<Command>(capacity.max(1));
        let worker = thread::Builder::new()
            .name("agora-books".into())
            .spawn(move || run_worker(rx))?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    /// A new observer handle feeding this recorder.
    pub fn observer(&self) -> RecorderHandle {
        RecorderHandle {
            tx: self.tx.clone(),
        }
    }

    /// Block until the worker has consumed everything sent so far.
    pub fn flush(&self) -> Result<(), BooksError> {
        flush(&self.tx)
    }

    /// Stop the worker and return the collected ledger.
    pub fn close(mut self) -> Result<Ledger, BooksError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<Ledger, BooksError> {
        let Some(worker) = self.worker.take() else {
            return Err(BooksError::Disconnected);
        };
        let (reply_tx, reply_rx) = bounded(1);
        let sent = self.tx.send(Command::Close(reply_tx));
        let ledger = match sent {
            Ok(()) => reply_rx.recv().map_err(|_| BooksError::Disconnected),
            Err(_) => Err(BooksError::Disconnected),
        };
        if worker.join().is_err() {
            return Err(BooksError::WorkerPanicked);
        }
        ledger
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.shutdown();
        }
    }
}

fn flush(tx: &Sender<Command>) -> Result<(), BooksError> {
    let (reply_tx, reply_rx) = bounded(1);
    tx.send(Command::Flush(reply_tx))
        .map_err(|_| BooksError::Disconnected)?;
    reply_rx.recv().map_err(|_| BooksError::Disconnected)
}

// ---------------------------------------------------------------------------
// Observer handle
// ---------------------------------------------------------------------------

/// Observer that forwards every notification to a [`Recorder`].
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: Sender<Command>,
}

impl RecorderHandle {
    fn send(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            tracing::warn!("recorder is closed; dropping record");
        }
    }
}

impl Observer for RecorderHandle {
    fn msg_notify(&mut self, msg: &Message, now: Ticks) {
        self.send(Command::Message(MessageRecord::from_message(msg, now)));
    }

    fn trans_notify(&mut self, tx: &Transaction, now: Ticks) {
        self.send(Command::Transaction(TransactionRecord::from_transaction(tx, now)));
    }

    fn end(&mut self) {
        if let Err(err) = flush(&self.tx) {
            tracing::warn!(%err, "recorder flush failed");
        }
    }
}
