//! Reference production facility.
//!
//! A [`Facility`] has an inbound and an outbound [`Buffer`]. Every period it:
//!
//! - **Tick**: offers everything in its outbound buffer to the market
//!   registered under its output commodity, and requests as much as its
//!   inbound buffer can take from the market of its input commodity.
//! - **Receive**: queues its own offers when a market sends them back
//!   matched.
//! - **Tock**: approves the queued offers (which moves resources into the
//!   requesters' inbound buffers), converts input into output when the
//!   conversion period is due, and finally creates new output up to its
//!   create rate.
//!
//! With no input commodity it is a pure source; with no output commodity a
//! pure sink.

use std::mem;

use crate::agent::{Agent, Ticker, Tocker};
use crate::buffer::{Buffer, BufferError};
use crate::context::Context;
use crate::error::SimError;
use crate::message::Message;
use crate::resource::{EPS, Generic, Quantity};
use crate::sim::{Clock, Ticks};
use crate::transaction::{Requester, Supplier, Transaction};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FacilityConfig {
    /// Service name of the market to buy from. `None` for a source.
    pub in_commod: Option<String>,
    pub in_units: String,
    pub in_size: Quantity,

    /// Service name of the market to sell to. `None` for a sink.
    pub out_commod: Option<String>,
    pub out_units: String,
    pub out_size: Quantity,

    /// Output created from nothing each period, limited by outbound space.
    pub create_rate: Quantity,
    /// Input converted into output per conversion.
    pub convert_amt: Quantity,
    /// Conversions happen when `(since_start + offset) % period == 0`.
    /// Zero means the engine step.
    pub convert_period: Ticks,
    pub convert_offset: Ticks,
}

impl FacilityConfig {
    /// A facility that creates `rate` of `commod` per period.
    pub fn source(commod: &str, size: Quantity, rate: Quantity) -> Self {
        Self {
            out_commod: Some(commod.to_string()),
            out_units: commod.to_string(),
            out_size: size,
            create_rate: rate,
            ..Self::default()
        }
    }

    /// A facility that only absorbs `commod`.
    pub fn sink(commod: &str, size: Quantity) -> Self {
        Self {
            in_commod: Some(commod.to_string()),
            in_units: commod.to_string(),
            in_size: size,
            ..Self::default()
        }
    }

    /// A facility that turns `input` into `output`, `amount` at a time.
    pub fn converter(input: &str, output: &str, size: Quantity, amount: Quantity) -> Self {
        Self {
            in_commod: Some(input.to_string()),
            in_units: input.to_string(),
            in_size: size,
            out_commod: Some(output.to_string()),
            out_units: output.to_string(),
            out_size: size,
            convert_amt: amount,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Facility
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Facility {
    config: FacilityConfig,
    inbound: Buffer,
    outbound: Buffer,
    queued: Vec<Message>,
}

impl Facility {
    pub fn new(config: FacilityConfig) -> Self {
        Self {
            inbound: Buffer::new(config.in_size),
            outbound: Buffer::new(config.out_size),
            config,
            queued: Vec::new(),
        }
    }

    pub fn config(&self) -> &FacilityConfig {
        &self.config
    }

    pub fn inbound(&self) -> &Buffer {
        &self.inbound
    }

    pub fn outbound(&self) -> &Buffer {
        &self.outbound
    }

    /// Mutable access for seeding stock before a run.
    pub fn outbound_mut(&mut self) -> &mut Buffer {
        &mut self.outbound
    }

    pub fn inbound_mut(&mut self) -> &mut Buffer {
        &mut self.inbound
    }

    /// Matched orders waiting for approval in the next tock.
    pub fn queued_orders(&self) -> usize {
        self.queued.len()
    }

    fn send_order(ctx: &mut Context<'_>, commod: &str, tx: Transaction) -> Result<(), SimError> {
        let market = ctx.service(commod)?;
        let msg = Message::new(ctx.id(), market).with_transaction(tx);
        ctx.send_on(msg)
    }

    fn create(&mut self, qty: Quantity) -> Result<(), BufferError> {
        if qty < EPS {
            return Ok(());
        }
        self.outbound
            .push(Generic::boxed(qty, self.config.out_units.as_str()))
    }

    fn convert(&mut self, clock: Clock) -> Result<(), BufferError> {
        let qty = self
            .config
            .convert_amt
            .min(self.outbound.space())
            .min(self.inbound.qty());
        if qty <= EPS || !clock.is_due(self.config.convert_period, self.config.convert_offset) {
            return Ok(());
        }

        let consumed = self.inbound.pop_qty(qty)?;
        if self.config.in_units == self.config.out_units {
            self.outbound.push_all(consumed)
        } else {
            self.create(qty)
        }
    }
}

impl Ticker for Facility {
    fn tick(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let me = ctx.id();

        if let Some(commod) = &self.config.out_commod {
            let qty = self.outbound.qty();
            if qty > EPS {
                let offer = Transaction::offer(me, &Generic::new(qty, self.config.out_units.as_str()));
                Self::send_order(ctx, commod, offer)?;
            }
        }

        if let Some(commod) = &self.config.in_commod {
            let qty = self.inbound.space();
            if qty > EPS {
                let request = Transaction::request(me, &Generic::new(qty, self.config.in_units.as_str()));
                Self::send_order(ctx, commod, request)?;
            }
        }
        Ok(())
    }
}

impl Tocker for Facility {
    fn tock(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        for mut msg in mem::take(&mut self.queued) {
            if let Some(mut tx) = msg.take_transaction() {
                ctx.approve(&mut tx, &mut *self)?;
            }
        }

        self.convert(ctx.clock())?;

        let qty = self.config.create_rate.min(self.outbound.space());
        self.create(qty)?;
        Ok(())
    }
}

impl Supplier for Facility {
    fn remove_resource(&mut self, tx: &mut Transaction) -> Result<(), BufferError> {
        let manifest = self.outbound.pop_qty(tx.qty())?;
        tracing::debug!(qty = tx.qty(), units = %self.config.out_units, "facility shipping");
        tx.set_manifest(manifest);
        Ok(())
    }
}

impl Requester for Facility {
    fn add_resource(&mut self, tx: &mut Transaction) -> Result<(), BufferError> {
        tracing::debug!(qty = tx.manifest_qty(), units = %self.config.in_units, "facility receiving");
        self.inbound.push_all(tx.manifest().to_vec())
    }
}

impl Agent for Facility {
    fn receive(&mut self, msg: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if msg.sender() == ctx.id() {
            self.queued.push(msg);
        } else {
            tracing::trace!(from = ?msg.sender(), "facility ignored foreign message");
        }
        Ok(())
    }

    fn as_ticker(&mut self) -> Option<&mut dyn Ticker> {
        Some(self)
    }

    fn as_tocker(&mut self) -> Option<&mut dyn Tocker> {
        Some(self)
    }

    fn as_supplier(&mut self) -> Option<&mut dyn Supplier> {
        Some(self)
    }

    fn as_requester(&mut self) -> Option<&mut dyn Requester> {
        Some(self)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
