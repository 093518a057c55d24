//! Messages and hierarchical routing.
//!
//! A [`Message`] travels between two agents that need not be directly
//! linked. Going **Up** it climbs the sender's parent chain (or jumps to an
//! explicit next hop), falling back to the original receiver once an owner
//! has no parent. Every Up hop is pushed onto the message's path stack.
//! Going **Down** it pops that stack one frame per hop, retracing the
//! upward path back to the sender.
//!
//! [`Message::route`] only advances the routing state. Delivery (observer
//! notification and the receiver's callback) is done by
//! [`Context::send_on`](crate::context::Context::send_on).

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::id::AgentId;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Routing failures. These indicate a broken topology and are fatal to the
/// run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("message has no hop left to send to")]
    NoReceiver,
    #[error("circular message send attempt at agent {0:?}")]
    Circular(AgentId),
    #[error("agent {0:?} is not registered")]
    UnknownAgent(AgentId),
    #[error("agent {0:?} is already handling a callback and cannot be re-entered")]
    AgentBusy(AgentId),
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Which way a message is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Toward the receiver, through parent links.
    Up,
    /// Back toward the sender, retracing the upward path.
    Down,
}

/// The envelope agents use to talk to each other. Usually carries a
/// [`Transaction`]; may carry an arbitrary payload instead or as well.
#[derive(Clone)]
pub struct Message {
    direction: Direction,
    transaction: Option<Transaction>,
    payload: Option<Rc<dyn Any>>,
    sender: AgentId,
    receiver: AgentId,
    owner: AgentId,
    prev_owner: Option<AgentId>,
    /// Agents visited on the way up, starting with the sender.
    path: Vec<AgentId>,
    /// Whether the top of `path` is an explicit next hop not yet taken.
    has_next: bool,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("direction", &self.direction)
            .field("transaction", &self.transaction)
            .field("payload", &self.payload.as_ref().map(|_| "<any>"))
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("owner", &self.owner)
            .field("prev_owner", &self.prev_owner)
            .field("path", &self.path)
            .finish()
    }
}

impl Message {
    /// A new Up message owned by `sender`, headed for `receiver`.
    pub fn new(sender: AgentId, receiver: AgentId) -> Self {
        Self {
            direction: Direction::Up,
            transaction: None,
            payload: None,
            sender,
            receiver,
            owner: sender,
            prev_owner: None,
            path: vec![sender],
            has_next: false,
        }
    }

    /// Attach a transaction.
    pub fn with_transaction(mut self, tx: Transaction) -> Self {
        self.transaction = Some(tx);
        self
    }

    /// Attach an arbitrary payload.
    pub fn with_payload<T: Any>(mut self, payload: T) -> Self {
        self.payload = Some(Rc::new(payload));
        self
    }

    pub fn sender(&self) -> AgentId {
        self.sender
    }

    pub fn receiver(&self) -> AgentId {
        self.receiver
    }

    /// The agent currently holding the message.
    pub fn owner(&self) -> AgentId {
        self.owner
    }

    /// The agent that held the message before the last hop.
    pub fn prev_owner(&self) -> Option<AgentId> {
        self.prev_owner
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Change direction. Turning Down discards a pending explicit next hop,
    /// since Down always retraces the recorded path.
    pub fn set_direction(&mut self, direction: Direction) {
        if direction == Direction::Down && self.has_next {
            self.path.pop();
            self.has_next = false;
        }
        self.direction = direction;
    }

    /// The recorded upward path, oldest first.
    pub fn path(&self) -> &[AgentId] {
        &self.path
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn transaction_mut(&mut self) -> Option<&mut Transaction> {
        self.transaction.as_mut()
    }

    pub fn set_transaction(&mut self, tx: Transaction) {
        self.transaction = Some(tx);
    }

    pub fn take_transaction(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }

    /// The payload, if present and of type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Override the next Up hop. Ignored while the message travels Down.
    pub fn set_next(&mut self, dest: AgentId) {
        if self.direction == Direction::Down {
            return;
        }
        if self.has_next {
            self.path.pop();
        }
        self.path.push(dest);
        self.has_next = true;
    }

    /// Advance the routing state by one hop and return the new owner.
    ///
    /// `parent_of` looks up an agent's parent in the hierarchy. On error the
    /// message is left unchanged.
    pub fn route<F>(&mut self, parent_of: F) -> Result<AgentId, RoutingError>
    where
        F: Fn(AgentId) -> Option<AgentId>,
    {
        let next = match self.direction {
            Direction::Up => {
                let next = if self.has_next {
                    *self.path.last().ok_or(RoutingError::NoReceiver)?
                } else {
                    parent_of(self.owner).unwrap_or(self.receiver)
                };
                if next == self.owner {
                    return Err(RoutingError::Circular(next));
                }
                if !self.has_next {
                    self.path.push(next);
                }
                next
            }
            Direction::Down => {
                if self.path.len() < 2 {
                    return Err(RoutingError::NoReceiver);
                }
                let next = self.path[self.path.len() - 2];
                if next == self.owner {
                    return Err(RoutingError::Circular(next));
                }
                self.path.pop();
                next
            }
        };

        self.prev_owner = Some(self.owner);
        self.owner = next;
        self.has_next = false;
        Ok(next)
    }
}
