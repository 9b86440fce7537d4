//! Domain layer types and invariants.

pub mod attributes;
pub mod entities;
pub mod error;
pub mod record;
pub mod rules;
