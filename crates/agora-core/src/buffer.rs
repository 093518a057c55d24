//! Capacity-bounded FIFO inventory of resources.
//!
//! A [`Buffer`] is owned by exactly one facility and is only mutated by it,
//! either during its own phase callbacks or from the supplier/requester
//! callbacks fired by transaction approval. Pushes are all-or-nothing;
//! popping by quantity splits the boundary resource so that the remaining
//! resources keep their order.

use std::collections::VecDeque;

use crate::resource::{EPS, INFINITY, Quantity, Resource, total_qty};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors returned by buffer operations. All of them leave the buffer
/// untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    #[error("buffer cannot hold more than its capacity (pushing {requested}, space {space})")]
    OverCapacity { requested: Quantity, space: Quantity },
    #[error("capacity {capacity} is below the held quantity {held}")]
    CapacityBelowHeld { capacity: Quantity, held: Quantity },
    #[error("operation results in a negligible quantity ({0})")]
    Negligible(Quantity),
    #[error("cannot pop {requested}: buffer holds {held}")]
    Underflow { requested: Quantity, held: Quantity },
    #[error("cannot pop {requested} resources: buffer holds {held}")]
    TooFew { requested: usize, held: usize },
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// FIFO resource container with a quantity capacity.
#[derive(Debug, Clone)]
pub struct Buffer {
    capacity: Quantity,
    resources: VecDeque<Box<dyn Resource>>,
}

impl Buffer {
    /// Create an empty buffer with the given capacity.
    pub fn new(capacity: Quantity) -> Self {
        Self {
            capacity: capacity.max(0.0),
            resources: VecDeque::new(),
        }
    }

    /// Create an empty buffer with no effective capacity limit.
    pub fn unlimited() -> Self {
        Self::new(INFINITY)
    }

    pub fn capacity(&self) -> Quantity {
        self.capacity
    }

    /// True when the capacity is the [`INFINITY`] sentinel (or larger).
    pub fn is_unlimited(&self) -> bool {
        self.capacity >= INFINITY
    }

    /// Change the capacity. Fails if the buffer already holds more than the
    /// new capacity.
    pub fn set_capacity(&mut self, capacity: Quantity) -> Result<(), BufferError> {
        let held = self.qty();
        if held - capacity > EPS {
            return Err(BufferError::CapacityBelowHeld { capacity, held });
        }
        self.capacity = capacity.max(0.0);
        Ok(())
    }

    /// Number of distinct resources held.
    pub fn count(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Total quantity held.
    pub fn qty(&self) -> Quantity {
        total_qty(&self.resources)
    }

    /// Remaining room. Returns [`INFINITY`] for unlimited buffers.
    pub fn space(&self) -> Quantity {
        if self.is_unlimited() {
            return INFINITY;
        }
        (self.capacity - self.qty()).max(0.0)
    }

    /// Iterate held resources from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Resource> + '_ {
        self.resources.iter().map(|r| r.as_ref())
    }

    /// Remove exactly `qty` from the front of the buffer, splitting the
    /// boundary resource if needed.
    pub fn pop_qty(&mut self, qty: Quantity) -> Result<Vec<Box<dyn Resource>>, BufferError> {
        if qty < EPS {
            return Err(BufferError::Negligible(qty));
        }
        let held = self.qty();
        if qty - held > EPS {
            return Err(BufferError::Underflow {
                requested: qty,
                held,
            });
        }

        let mut left = qty;
        let mut popped = Vec::new();
        while left > EPS {
            let Some(mut front) = self.resources.pop_front() else {
                break;
            };
            let available = front.qty();
            if available - left > EPS {
                let mut leftover = front.clone();
                leftover.set_qty(available - left);
                front.set_qty(left);
                self.resources.push_front(leftover);
                left = 0.0;
            } else {
                left -= available;
            }
            popped.push(front);
        }
        Ok(popped)
    }

    /// Remove the `n` oldest resources without splitting.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Box<dyn Resource>>, BufferError> {
        if self.resources.len() < n {
            return Err(BufferError::TooFew {
                requested: n,
                held: self.resources.len(),
            });
        }
        Ok(self.resources.drain(..n).collect())
    }

    /// Remove the oldest resource.
    pub fn pop_one(&mut self) -> Result<Box<dyn Resource>, BufferError> {
        self.resources.pop_front().ok_or(BufferError::TooFew {
            requested: 1,
            held: 0,
        })
    }

    /// Append one resource.
    pub fn push(&mut self, resource: Box<dyn Resource>) -> Result<(), BufferError> {
        self.check_room(resource.qty())?;
        self.resources.push_back(resource);
        Ok(())
    }

    /// Append all resources, or none of them if together they don't fit.
    pub fn push_all(&mut self, resources: Vec<Box<dyn Resource>>) -> Result<(), BufferError> {
        self.check_room(total_qty(&resources))?;
        self.resources.extend(resources);
        Ok(())
    }

    fn check_room(&self, requested: Quantity) -> Result<(), BufferError> {
        let space = self.space();
        if requested - space > EPS {
            return Err(BufferError::OverCapacity { requested, space });
        }
        Ok(())
    }
}
