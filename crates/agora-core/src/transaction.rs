//! Offer/request transactions and the transfer contract they execute.
//!
//! A [`Transaction`] starts one-sided: an offer knows its supplier, a request
//! knows its requester. A market pairs complementary transactions with
//! [`Transaction::match_with`], filling in the missing party on each side.
//! The supplier then calls [`Transaction::approve`], which debits the
//! supplier, credits the requester and notifies observers, exactly once.
//!
//! # States
//!
//! ```text
//! UnmatchedOffer ──┐
//!                  ├─ match_with ─> Matched ─ approve ─> Approved
//! UnmatchedRequest ┘
//! ```
//!
//! Approval has no rollback: if the requester rejects the manifest after the
//! supplier has already released it, the error is returned and the released
//! resources are gone. Callers treat that as fatal.

use crate::buffer::BufferError;
use crate::id::AgentId;
use crate::observer::Observer;
use crate::resource::{Quantity, Resource, total_qty};
use crate::sim::Ticks;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by the transaction state machine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransactionError {
    #[error("non-complementary transaction types: both are {0:?}")]
    NonComplementary(TransactionKind),
    #[error("transaction is not matched")]
    NotMatched,
    #[error("transaction has already been approved")]
    AlreadyApproved,
    #[error("agent {0:?} cannot act as a supplier")]
    NotASupplier(AgentId),
    #[error("agent {0:?} cannot act as a requester")]
    NotARequester(AgentId),
    #[error("agent {0:?} is not available to settle the transaction")]
    PartyUnavailable(AgentId),
    #[error("supplier {supplier:?} failed to release resources: {source}")]
    Supply {
        supplier: AgentId,
        #[source]
        source: BufferError,
    },
    #[error("requester {requester:?} failed to accept resources: {source}")]
    Receive {
        requester: AgentId,
        #[source]
        source: BufferError,
    },
}

// ---------------------------------------------------------------------------
// Transfer contract
// ---------------------------------------------------------------------------

/// Releases resources when a transaction it supplies is approved.
pub trait Supplier {
    /// Remove exactly `tx.resource().qty()` from outbound inventory and store
    /// the removed pieces with [`Transaction::set_manifest`].
    fn remove_resource(&mut self, tx: &mut Transaction) -> Result<(), BufferError>;
}

/// Accepts resources when a transaction it requested is approved.
pub trait Requester {
    /// Push the transaction's manifest into inbound inventory.
    fn add_resource(&mut self, tx: &mut Transaction) -> Result<(), BufferError>;
}

/// Resolves transaction parties to their transfer callbacks at approval time.
pub trait Counterparties {
    fn supplier(&mut self, id: AgentId) -> Result<&mut dyn Supplier, TransactionError>;
    fn requester(&mut self, id: AgentId) -> Result<&mut dyn Requester, TransactionError>;
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Which side of an exchange a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TransactionKind {
    Offer,
    Request,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TransactionState {
    UnmatchedOffer,
    UnmatchedRequest,
    Matched,
    Approved,
}

/// One resource exchange between a supplier and a requester.
///
/// Cloning deep-copies the resource and manifest; party ids are shared.
#[derive(Debug, Clone)]
pub struct Transaction {
    kind: TransactionKind,
    state: TransactionState,
    resource: Box<dyn Resource>,
    supplier: Option<AgentId>,
    requester: Option<AgentId>,
    manifest: Vec<Box<dyn Resource>>,
}

impl Transaction {
    /// A one-sided offer from `supplier`. The resource is cloned.
    pub fn offer(supplier: AgentId, resource: &dyn Resource) -> Self {
        Self {
            kind: TransactionKind::Offer,
            state: TransactionState::UnmatchedOffer,
            resource: resource.clone_resource(),
            supplier: Some(supplier),
            requester: None,
            manifest: Vec::new(),
        }
    }

    /// A one-sided request from `requester`. The resource is cloned.
    pub fn request(requester: AgentId, resource: &dyn Resource) -> Self {
        Self {
            kind: TransactionKind::Request,
            state: TransactionState::UnmatchedRequest,
            resource: resource.clone_resource(),
            supplier: None,
            requester: Some(requester),
            manifest: Vec::new(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_approved(&self) -> bool {
        self.state == TransactionState::Approved
    }

    /// The resource being exchanged (this transaction's private copy).
    pub fn resource(&self) -> &dyn Resource {
        self.resource.as_ref()
    }

    /// Mutable access to the private resource copy, e.g. to shrink an
    /// offer after part of it was split off.
    pub fn resource_mut(&mut self) -> &mut dyn Resource {
        self.resource.as_mut()
    }

    /// Replace the resource with a clone of `resource`.
    pub fn set_resource(&mut self, resource: &dyn Resource) {
        self.resource = resource.clone_resource();
    }

    /// Shorthand for `resource().qty()`.
    pub fn qty(&self) -> Quantity {
        self.resource.qty()
    }

    pub fn supplier(&self) -> Option<AgentId> {
        self.supplier
    }

    pub fn requester(&self) -> Option<AgentId> {
        self.requester
    }

    /// The resources actually moved on approval.
    pub fn manifest(&self) -> &[Box<dyn Resource>] {
        &self.manifest
    }

    pub fn set_manifest(&mut self, manifest: Vec<Box<dyn Resource>>) {
        self.manifest = manifest;
    }

    /// Total quantity of the manifest.
    pub fn manifest_qty(&self) -> Quantity {
        total_qty(&self.manifest)
    }

    /// Pair this transaction with its complement. The offer adopts the
    /// request's requester; the request adopts the offer's supplier.
    ///
    /// Neither transaction is modified on failure.
    pub fn match_with(&mut self, other: &mut Transaction) -> Result<(), TransactionError> {
        if self.kind == other.kind {
            return Err(TransactionError::NonComplementary(self.kind));
        }
        if self.is_approved() || other.is_approved() {
            return Err(TransactionError::AlreadyApproved);
        }

        let (offer, request) = match self.kind {
            TransactionKind::Offer => (self, other),
            TransactionKind::Request => (other, self),
        };
        offer.requester = request.requester;
        request.supplier = offer.supplier;
        offer.state = TransactionState::Matched;
        request.state = TransactionState::Matched;
        Ok(())
    }

    /// Execute the transfer: debit the supplier, credit the requester, then
    /// notify observers. Valid once per matched transaction.
    pub fn approve(
        &mut self,
        parties: &mut dyn Counterparties,
        observers: &mut [Box<dyn Observer>],
        now: Ticks,
    ) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Approved => return Err(TransactionError::AlreadyApproved),
            TransactionState::Matched => {}
            _ => return Err(TransactionError::NotMatched),
        }
        let (Some(supplier), Some(requester)) = (self.supplier, self.requester) else {
            return Err(TransactionError::NotMatched);
        };

        parties
            .supplier(supplier)?
            .remove_resource(self)
            .map_err(|source| TransactionError::Supply { supplier, source })?;
        parties
            .requester(requester)?
            .add_resource(self)
            .map_err(|source| TransactionError::Receive { requester, source })?;

        tracing::debug!(
            ?supplier,
            ?requester,
            qty = self.manifest_qty(),
            units = self.resource.units(),
            "transaction approved"
        );

        for observer in observers.iter_mut() {
            observer.trans_notify(self, now);
        }
        self.state = TransactionState::Approved;
        Ok(())
    }
}
