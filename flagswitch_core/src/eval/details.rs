use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ResolutionError;

/// How an evaluated value was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// Computed locally by static rule evaluation of an offline document.
    Static,
    /// Read from a snapshot of values previously evaluated by a remote vendor.
    Cached,
    /// The flag is unknown to the provider; the caller's default was used.
    Default,
    /// Evaluation failed; the caller's default was used.
    Error,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Static => "STATIC",
            Reason::Cached => "CACHED",
            Reason::Default => "DEFAULT",
            Reason::Error => "ERROR",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a typed flag read. Always carries a usable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDetails<T> {
    pub value: T,
    /// Variant name, for vendors that report one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub reason: Reason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResolutionError>,
}

impl<T> ResolutionDetails<T> {
    /// A value computed from an offline document.
    pub fn static_value(value: T) -> ResolutionDetails<T> {
        ResolutionDetails {
            value,
            variant: None,
            reason: Reason::Static,
            error: None,
        }
    }

    /// A value read from a vendor snapshot.
    pub fn cached(value: T, variant: Option<String>) -> ResolutionDetails<T> {
        ResolutionDetails {
            value,
            variant,
            reason: Reason::Cached,
            error: None,
        }
    }

    /// The caller's default for a flag the provider does not know.
    pub fn default_value(value: T) -> ResolutionDetails<T> {
        ResolutionDetails {
            value,
            variant: None,
            reason: Reason::Default,
            error: None,
        }
    }

    /// The caller's default after a failed evaluation.
    pub fn error(value: T, error: ResolutionError) -> ResolutionDetails<T> {
        ResolutionDetails {
            value,
            variant: None,
            reason: Reason::Error,
            error: Some(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResolutionDetails<U> {
        ResolutionDetails {
            value: f(self.value),
            variant: self.variant,
            reason: self.reason,
            error: self.error,
        }
    }
}
