// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulated tags.

use opcbridge_core::Value;
use rand::rngs::StdRng;
use rand::Rng;

/// How a simulated tag evolves on every server update.
#[derive(Debug, Clone, PartialEq)]
pub enum TagBehavior {
    /// Float drifting by a uniform step in `[-step, step]`.
    RandomWalk {
        /// Largest change per update.
        step: f64,
    },
    /// Integer growing by `step`.
    Counter {
        /// Increment per update.
        step: i64,
    },
    /// Boolean flipping on every update.
    Toggle,
    /// Never changes on its own.
    Static,
}

/// One item of the simulated address space.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTag {
    /// Fully qualified name, dot separated (`Line1.Speed`).
    pub name: String,
    /// Update behavior.
    pub behavior: TagBehavior,
    /// Current value.
    pub value: Value,
    /// Accepts writes.
    pub writable: bool,
}

impl SimTag {
    /// A drifting float.
    pub fn random_walk(name: impl Into<String>, initial: f64, step: f64) -> Self {
        Self::new(name, TagBehavior::RandomWalk { step: step.abs() }, initial)
    }

    /// An incrementing integer.
    pub fn counter(name: impl Into<String>, initial: i64, step: i64) -> Self {
        Self::new(name, TagBehavior::Counter { step }, initial)
    }

    /// A flipping boolean.
    pub fn toggle(name: impl Into<String>, initial: bool) -> Self {
        Self::new(name, TagBehavior::Toggle, initial)
    }

    /// A value that only changes when written.
    pub fn fixed(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(name, TagBehavior::Static, value)
    }

    fn new(name: impl Into<String>, behavior: TagBehavior, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            behavior,
            value: value.into(),
            writable: true,
        }
    }

    /// Rejects writes.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Applies one update. Returns `true` if the value changed.
    pub(crate) fn advance(&mut self, rng: &mut StdRng) -> bool {
        let next = match (&self.behavior, &self.value) {
            (TagBehavior::RandomWalk { step }, Value::Float64(current)) if *step > 0.0 => {
                Value::Float64(current + rng.gen_range(-*step..=*step))
            }
            (TagBehavior::Counter { step }, Value::Int64(current)) => {
                Value::Int64(current.wrapping_add(*step))
            }
            (TagBehavior::Toggle, Value::Bool(current)) => Value::Bool(!current),
            // Written values of a foreign type freeze the tag until a matching one is written.
            _ => return false,
        };
        let changed = next != self.value;
        self.value = next;
        changed
    }
}

/// The catalogue used when none is configured.
pub fn default_catalogue() -> Vec<SimTag> {
    vec![
        SimTag::random_walk("Line1.Speed", 120.0, 2.5),
        SimTag::random_walk("Line1.Temperature", 21.5, 0.2),
        SimTag::toggle("Line1.Running", true),
        SimTag::counter("Line1.Count", 0, 1),
        SimTag::fixed("Line1.Recipe", "PVC-200"),
        SimTag::random_walk("Line2.Speed", 95.0, 1.5),
        SimTag::counter("Line2.Count", 0, 1),
        SimTag::fixed("Plant.Name", "North").read_only(),
    ]
}
