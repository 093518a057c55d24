//! Greedy first-come-first-served market.
//!
//! A [`Market`] collects offer and request messages as they arrive and
//! clears them once per period in its Resolve callback. Each request is
//! filled from the head of the offer queue; an offer larger than what is
//! still needed is split, the matched part is sent back and the residual
//! stays at the head for the next request. Every matched offer message is
//! turned Down and sent back along its path. Unmet request quantity is
//! dropped, and both queues are emptied at the end of every clearing.

use std::collections::VecDeque;
use std::mem;

use crate::agent::{Agent, Resolver};
use crate::context::Context;
use crate::error::SimError;
use crate::message::{Direction, Message};
use crate::resource::{EPS, INFINITY, Quantity};
use crate::rng::SimRng;
use crate::transaction::{Transaction, TransactionKind};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Shuffle both queues before clearing instead of serving in arrival
    /// order.
    pub shuffle: bool,
    /// Seed for the shuffle.
    pub seed: u64,
}

/// What the most recent clearing did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Clearing {
    pub offers: usize,
    pub requests: usize,
    /// Offer messages (whole or split) sent back matched.
    pub matches: usize,
    pub matched_qty: Quantity,
    /// Requested quantity that found no offer. Open-ended requests (for
    /// [`INFINITY`] or more) are not counted.
    pub unmet_qty: Quantity,
    /// Offered quantity left over when the queues were cleared.
    pub unsold_qty: Quantity,
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Market {
    config: MarketConfig,
    rng: SimRng,
    offers: Vec<Message>,
    requests: Vec<Message>,
    last: Clearing,
}

impl Market {
    pub fn new(config: MarketConfig) -> Self {
        let rng = SimRng::new(config.seed);
        Self {
            config,
            rng,
            offers: Vec::new(),
            requests: Vec::new(),
            last: Clearing::default(),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Offers waiting for the next clearing.
    pub fn pending_offers(&self) -> usize {
        self.offers.len()
    }

    /// Requests waiting for the next clearing.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn last_clearing(&self) -> Clearing {
        self.last
    }

    fn clear(&mut self, ctx: &mut Context<'_>) -> Result<Clearing, SimError> {
        let mut offers = mem::take(&mut self.offers);
        let mut requests = mem::take(&mut self.requests);
        if self.config.shuffle {
            self.rng.shuffle(&mut offers);
            self.rng.shuffle(&mut requests);
        }

        let mut summary = Clearing {
            offers: offers.len(),
            requests: requests.len(),
            ..Clearing::default()
        };
        let mut offers: VecDeque<Message> = offers.into();

        for mut request in requests {
            let wanted = qty_of(&request);
            let open_ended = wanted >= INFINITY;
            if offers.is_empty() {
                if !open_ended {
                    summary.unmet_qty += wanted;
                }
                continue;
            }

            let matched = extract_qty(&mut offers, wanted);
            let filled: Quantity = matched.iter().map(qty_of).sum();
            let unmet = wanted - filled;
            if open_ended {
                tracing::debug!(
                    requester = ?request.sender(),
                    filled,
                    "open-ended request filled with all remaining offers"
                );
            } else if unmet > EPS {
                tracing::warn!(
                    requester = ?request.sender(),
                    wanted,
                    filled,
                    "request partially filled; remainder dropped"
                );
                summary.unmet_qty += unmet;
            }

            let Some(request_tx) = request.transaction_mut() else {
                continue;
            };
            for mut offer in matched {
                if let Some(offer_tx) = offer.transaction_mut() {
                    offer_tx.match_with(request_tx)?;
                }
                summary.matches += 1;
                summary.matched_qty += qty_of(&offer);
                offer.set_direction(Direction::Down);
                ctx.send_on(offer)?;
            }
        }

        summary.unsold_qty = offers.iter().map(qty_of).sum();
        Ok(summary)
    }
}

fn qty_of(msg: &Message) -> Quantity {
    msg.transaction().map_or(0.0, Transaction::qty)
}

/// Take offers from the front of the queue until `qty` is covered.
///
/// An offer that would overshoot is split: a copy carrying exactly the
/// missing quantity is returned and the original keeps the rest at the head
/// of the queue.
fn extract_qty(offers: &mut VecDeque<Message>, qty: Quantity) -> Vec<Message> {
    let mut unmet = qty;
    let mut taken = Vec::new();
    while unmet >= EPS {
        let Some(front) = offers.front_mut() else {
            break;
        };
        let available = qty_of(front);
        if available <= unmet + EPS {
            unmet -= available;
            if let Some(whole) = offers.pop_front() {
                taken.push(whole);
            }
        } else {
            let mut part = front.clone();
            if let Some(tx) = part.transaction_mut() {
                tx.resource_mut().set_qty(unmet);
            }
            if let Some(tx) = front.transaction_mut() {
                tx.resource_mut().set_qty(available - unmet);
            }
            taken.push(part);
            unmet = 0.0;
        }
    }
    taken
}

impl Resolver for Market {
    fn resolve(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if self.offers.is_empty() && self.requests.is_empty() {
            self.last = Clearing::default();
            return Ok(());
        }
        let summary = self.clear(ctx)?;
        tracing::debug!(
            market = ?ctx.id(),
            offers = summary.offers,
            requests = summary.requests,
            matches = summary.matches,
            matched_qty = summary.matched_qty,
            unmet_qty = summary.unmet_qty,
            "market cleared"
        );
        self.last = summary;
        Ok(())
    }
}

impl Agent for Market {
    fn receive(&mut self, msg: Message, _ctx: &mut Context<'_>) -> Result<(), SimError> {
        match msg.transaction().map(Transaction::kind) {
            Some(TransactionKind::Offer) => self.offers.push(msg),
            Some(TransactionKind::Request) => self.requests.push(msg),
            None => {
                tracing::warn!(sender = ?msg.sender(), "market ignored message without a transaction");
            }
        }
        Ok(())
    }

    fn as_resolver(&mut self) -> Option<&mut dyn Resolver> {
        Some(self)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
