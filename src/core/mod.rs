// Core domain types: errors, models, crypto primitives, resilience

pub mod crypto;
pub mod errors;
pub mod models;
pub mod resilience;
