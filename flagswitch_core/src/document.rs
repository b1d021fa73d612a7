use serde_json::Value;

use crate::{environment::FeatureState, EvaluationContext, FetchError};

/// A parsed, immutable offline flag document that can answer flag lookups without network access.
///
/// Implemented by the environment document of the core engine as well as by the other supported
/// offline formats, so that offline providers are generic over the document they load.
pub trait RuleDocument: Send + Sync + Sized + 'static {
    /// Human-readable name of the format. Used in logs.
    const FORMAT: &'static str;

    /// Parse and index a document from its raw JSON bytes.
    fn from_slice(bytes: &[u8]) -> std::result::Result<Self, FetchError>;

    /// Find the record that applies to `key` under `context`. Returns `None` if the flag is
    /// unknown or no record applies, in which case callers fall back to their default value.
    fn resolve<'a>(&'a self, key: &str, context: &EvaluationContext) -> Option<Resolved<'a>>;

    /// Keys of all flags defined in the document.
    fn flag_keys(&self) -> Vec<String>;
}

/// Outcome of [`RuleDocument::resolve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    /// A feature state of an environment document, carrying both an enabled flag and a value.
    State(&'a FeatureState),
    /// A bare value, as produced by formats without an enabled state.
    Value(&'a Value),
}
