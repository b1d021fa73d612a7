use serde_json::Value;

use crate::{
    environment::FeatureState,
    value::{as_number, is_truthy, to_display_string},
    Resolved,
};

/// A resolved flag record: an optional enabled state and an optional raw value.
pub trait StateRecord {
    /// Enabled state of the flag, if the record carries one.
    fn enabled(&self) -> Option<bool>;
    /// Raw value. `None` when the value is missing or `null`.
    fn value(&self) -> Option<&Value>;
}

impl StateRecord for FeatureState {
    fn enabled(&self) -> Option<bool> {
        self.enabled
    }

    fn value(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| !v.is_null())
    }
}

impl StateRecord for Value {
    fn enabled(&self) -> Option<bool> {
        None
    }

    fn value(&self) -> Option<&Value> {
        Some(self).filter(|v| !v.is_null())
    }
}

impl StateRecord for Resolved<'_> {
    fn enabled(&self) -> Option<bool> {
        match self {
            Resolved::State(state) => state.enabled,
            Resolved::Value(_) => None,
        }
    }

    fn value(&self) -> Option<&Value> {
        match self {
            Resolved::State(state) => StateRecord::value(*state),
            Resolved::Value(value) => StateRecord::value(*value),
        }
    }
}

/// Boolean reading of a record. A present value is read for its truthiness. Without a value, the
/// enabled state is used, then the default.
pub fn boolean_value<S: StateRecord + ?Sized>(record: Option<&S>, default: bool) -> bool {
    let Some(record) = record else {
        return default;
    };
    match record.value() {
        Some(value) => is_truthy(value),
        None => record.enabled().unwrap_or(default),
    }
}

/// String reading of a record. Non-string values are stringified.
pub fn string_value<S: StateRecord + ?Sized>(record: Option<&S>, default: &str) -> String {
    match record.and_then(StateRecord::value) {
        Some(value) => to_display_string(value).into_owned(),
        None => default.to_owned(),
    }
}

/// Numeric reading of a record. Values that are neither numbers nor numeric strings yield the
/// default.
pub fn number_value<S: StateRecord + ?Sized>(record: Option<&S>, default: f64) -> f64 {
    record
        .and_then(StateRecord::value)
        .and_then(as_number)
        .unwrap_or(default)
}

/// Object reading of a record. The value is returned as-is, without any conversion.
pub fn object_value<S: StateRecord + ?Sized>(record: Option<&S>, default: &Value) -> Value {
    record
        .and_then(StateRecord::value)
        .unwrap_or(default)
        .clone()
}
