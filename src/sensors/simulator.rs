// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Bounded random-walk reading model

use rand::prelude::*;
use rand_distr::Uniform;

use super::{Quantity, ReadingState};
use crate::config::{DeviceConfig, QuantityBounds};

/// Snow settles at a third of the rate it can accumulate
const SNOW_SETTLE_RATIO: f64 = 1.0 / 3.0;

/// Slack for float noise when snapping to the 0.1 grid
const GRID_EPSILON: f64 = 1e-9;

/// Produces correlated, gradually drifting readings for one location.
///
/// Every value the model hands out is already rounded to one decimal place,
/// lies within `[min, max]` and is within `variation` of the previous value.
#[derive(Debug, Clone, Copy)]
pub struct ReadingModel {
    config: DeviceConfig,
}

impl ReadingModel {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Starting point: uniform over each quantity's full range
    pub fn initial<R: Rng + ?Sized>(&self, rng: &mut R) -> ReadingState {
        let mut state = ReadingState {
            ice_thickness: 0.0,
            surface_temperature: 0.0,
            snow_accumulation: 0.0,
            external_temperature: 0.0,
        };
        for quantity in Quantity::ALL {
            let bounds = self.config.bounds(quantity);
            let value = rng.sample(Uniform::new_inclusive(bounds.min, bounds.max));
            state.set(quantity, quantize(value, bounds.min, bounds.max));
        }
        state
    }

    /// Next reading derived from `previous`; each quantity moves independently
    pub fn next<R: Rng + ?Sized>(&self, previous: &ReadingState, rng: &mut R) -> ReadingState {
        let mut state = *previous;
        for quantity in Quantity::ALL {
            let bounds = self.config.bounds(quantity);
            state.set(quantity, step(quantity, bounds, previous.get(quantity), rng));
        }
        state
    }
}

fn step<R: Rng + ?Sized>(quantity: Quantity, bounds: &QuantityBounds, previous: f64, rng: &mut R) -> f64 {
    let delta = draw_delta(quantity, bounds.variation, rng);
    let candidate = (previous + delta).clamp(bounds.min, bounds.max);

    // Window the rounded value must stay in
    let lo = bounds.min.max(previous - bounds.variation);
    let hi = bounds.max.min(previous + bounds.variation);
    quantize(candidate, lo, hi)
}

/// Per-tick change for `quantity`, never larger than `variation` in magnitude.
///
/// Snow accumulation is skewed: half the time it grows by up to `variation`,
/// otherwise it settles by at most a third of that.
pub fn draw_delta<R: Rng + ?Sized>(quantity: Quantity, variation: f64, rng: &mut R) -> f64 {
    match quantity {
        Quantity::SnowAccumulation => {
            if rng.gen_bool(0.5) {
                rng.sample(Uniform::new_inclusive(0.0, variation))
            } else {
                -rng.sample(Uniform::new_inclusive(0.0, variation * SNOW_SETTLE_RATIO))
            }
        }
        _ => rng.sample(Uniform::new_inclusive(-variation, variation)),
    }
}

/// Round to one decimal, snapping inward if rounding left `[lo, hi]`.
///
/// Falls back to the unrounded clamp when the window holds no 0.1 step.
pub fn quantize(value: f64, lo: f64, hi: f64) -> f64 {
    let mut rounded = round_one_decimal(value);
    if rounded > hi {
        rounded = (hi * 10.0 + GRID_EPSILON).floor() / 10.0;
    }
    if rounded < lo {
        rounded = (lo * 10.0 - GRID_EPSILON).ceil() / 10.0;
    }
    if rounded < lo - GRID_EPSILON || rounded > hi + GRID_EPSILON {
        return value.clamp(lo, hi);
    }
    // clamp away float noise from the snap
    rounded.clamp(lo, hi)
}

pub fn round_one_decimal(value: f64) -> f64 {
    let rounded = (value * 10.0).round() / 10.0;
    // avoid "-0.0" on the wire
    if rounded == 0.0 { 0.0 } else { rounded }
}
