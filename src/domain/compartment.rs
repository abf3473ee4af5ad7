// Copyright (c) 2025 - Cowboy AI, Inc.
//! Compartment reference

use serde::{Deserialize, Serialize};

use super::ids::{BankId, CompartmentId};

/// A compartment and the bank that physically drives it
///
/// The wire command addresses compartments by `number` within a bank; the
/// backend addresses them by `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compartment {
    pub id: CompartmentId,
    pub bank_id: BankId,
    pub number: u32,
}

impl Compartment {
    pub fn new(id: CompartmentId, bank_id: BankId, number: u32) -> Self {
        Self { id, bank_id, number }
    }
}
