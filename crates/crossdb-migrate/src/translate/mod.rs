//! Engine-independent helpers for the per-engine translators.
//!
//! - [`native`]: parsing native type syntax
//! - [`expression`]: default-value recognition, literal parsing, constant cache
//! - [`repr`]: literal rendering pieces (control characters, temporal text)

pub mod expression;
pub mod native;
pub mod repr;

pub use expression::{canonicalize_default, ConstantCache, Recognized};
pub use native::{NativeArg, NativeType};
