//! Precision helpers for order quantities and prices

use rust_decimal::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of decimal places in a price/quantity step.
///
/// An exchange reports its tick size and quantity step as floats
/// (`0.001`, `0.5`, `1`); orders must be truncated to that many places.
pub fn decimal_places(step: f64) -> u32 {
    Decimal::from_f64(step)
        .map(|d| d.normalize().scale())
        .unwrap_or(0)
}

/// Truncate `value` towards zero to `places` decimal places.
pub fn truncate_float(value: f64, places: u32) -> f64 {
    match Decimal::from_f64(value) {
        Some(d) => d.trunc_with_scale(places).to_f64().unwrap_or(value),
        None => value,
    }
}

/// Round `value` half-up to `places` decimal places.
pub fn round_float(value: f64, places: u32) -> f64 {
    match Decimal::from_f64(value) {
        Some(d) => d
            .round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
            .to_f64()
            .unwrap_or(value),
        None => value,
    }
}

/// A 64-bit float with atomic load/store through its bit pattern.
///
/// Used for hot-read/occasional-write fields (last price, position,
/// limit prices). Readers always observe the latest committed value,
/// never a torn one. Writers are single per field.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}
