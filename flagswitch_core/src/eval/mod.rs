//! Turning resolved flag records into typed values.
//!
//! Coercions never fail. Each one takes the resolved record (or its absence) together with the
//! caller's default and returns a usable value. Providers wrap the value into
//! [`ResolutionDetails`] along with a [`Reason`].
mod coercion;
mod details;

pub use coercion::{boolean_value, number_value, object_value, string_value, StateRecord};
pub use details::{Reason, ResolutionDetails};
