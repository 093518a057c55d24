//! Fungible resource abstraction.
//!
//! A [`Resource`] is a quantity of some fungible type measured in named
//! units. Buffers, transactions and manifests hold resources as
//! `Box<dyn Resource>` so that any concrete resource type (generic goods,
//! materials with composition, ...) can flow through the same core.
//!
//! Quantities are `f64`. Repeated splitting accumulates floating error, so
//! every quantity comparison in the core goes through [`EPS`].

use std::fmt;

/// Effective quantity precision. Quantities and deviations smaller than
/// `EPS` are treated as zero.
pub const EPS: f64 = 1e-6;

/// Sentinel for "unlimited" quantities (e.g. an unbounded buffer capacity).
pub const INFINITY: f64 = 1e25;

/// A quantity of resource, in the resource's units.
pub type Quantity = f64;

/// Returns true if `qty` is too small to matter.
#[inline]
pub fn is_negligible(qty: Quantity) -> bool {
    qty.abs() < EPS
}

/// Returns true if `a` and `b` are equal within [`EPS`].
#[inline]
pub fn approx_eq(a: Quantity, b: Quantity) -> bool {
    (a - b).abs() < EPS
}

/// Sum of the quantities of a sequence of resources.
pub fn total_qty<'a, I>(resources: I) -> Quantity
where
    I: IntoIterator<Item = &'a Box<dyn Resource>>,
{
    resources.into_iter().map(|r| r.qty()).sum()
}

// ---------------------------------------------------------------------------
// Resource trait
// ---------------------------------------------------------------------------

/// Implemented by every transactable resource.
pub trait Resource: fmt::Debug {
    /// Type tag of the resource (e.g. `"Generic"`).
    fn kind(&self) -> &str;

    /// Units the quantity is measured in.
    fn units(&self) -> &str;

    /// Current quantity. Never negative.
    fn qty(&self) -> Quantity;

    /// Overwrite the quantity.
    fn set_qty(&mut self, qty: Quantity);

    /// An independent copy of this resource.
    fn clone_resource(&self) -> Box<dyn Resource>;
}

impl Clone for Box<dyn Resource> {
    fn clone(&self) -> Self {
        self.clone_resource()
    }
}

// ---------------------------------------------------------------------------
// Generic resource
// ---------------------------------------------------------------------------

/// A plain fungible resource: units and a quantity, nothing else.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Generic {
    units: String,
    qty: Quantity,
}

impl Generic {
    pub const KIND: &'static str = "Generic";

    /// Create a generic resource. Negative quantities are clamped to zero.
    pub fn new(qty: Quantity, units: impl Into<String>) -> Self {
        Self {
            units: units.into(),
            qty: qty.max(0.0),
        }
    }

    /// Boxed constructor, for pushing straight into buffers and manifests.
    pub fn boxed(qty: Quantity, units: impl Into<String>) -> Box<dyn Resource> {
        Box::new(Self::new(qty, units))
    }
}

impl Resource for Generic {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn units(&self) -> &str {
        &self.units
    }

    fn qty(&self) -> Quantity {
        self.qty
    }

    fn set_qty(&mut self, qty: Quantity) {
        self.qty = qty.max(0.0);
    }

    fn clone_resource(&self) -> Box<dyn Resource> {
        Box::new(self.clone())
    }
}
