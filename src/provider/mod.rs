//! The provider lifecycle contract and its implementations.
//!
//! Every flag source, offline or remote, is a [`FeatureProvider`]. The client only ever talks to
//! providers through this trait, so switching between them requires no changes in application
//! code.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flagswitch_core::{
    eval::ResolutionDetails,
    events::{EventHandler, ProviderEventKind, Subscription},
    EvaluationContext, Result,
};

mod lifecycle;
mod offline;
pub mod remote;

pub(crate) use lifecycle::guard_resolution;
pub use lifecycle::ProviderState;
pub use offline::OfflineProvider;

/// Lifecycle state of a provider.
///
/// `Uninitialized → Initializing → Ready ⇄ Refreshing`, and `ShuttingDown → Shutdown` from any
/// state. `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Uninitialized,
    Initializing,
    Ready,
    /// Ready, with a reload in progress. Flag reads are served from the current state.
    Refreshing,
    ShuttingDown,
    Shutdown,
}

impl ProviderStatus {
    /// Whether flag reads can be served.
    pub fn is_ready(self) -> bool {
        matches!(self, ProviderStatus::Ready | ProviderStatus::Refreshing)
    }
}

/// Whether a provider evaluates locally or asks a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Offline,
    Online,
}

/// Static description of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Stable id, as stored in the choice store.
    pub id: String,
    /// Human-readable name.
    pub label: String,
    pub mode: ProviderMode,
}

impl ProviderMetadata {
    pub fn new(id: impl Into<String>, label: impl Into<String>, mode: ProviderMode) -> Self {
        ProviderMetadata {
            id: id.into(),
            label: label.into(),
            mode,
        }
    }
}

/// Uniform lifecycle contract of a flag source.
///
/// Lifecycle operations are async and may fail; errors propagate to the caller. Flag reads are
/// synchronous and never fail: internal failures degrade to the caller's default with an `ERROR`
/// reason.
///
/// A context passed to a read is always used for that read. Reads without a context use the
/// ambient context, which only [`initialize`](FeatureProvider::initialize) and
/// [`on_context_change`](FeatureProvider::on_context_change) update.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    fn status(&self) -> ProviderStatus;

    /// Load the provider's state and make it ready. Emits `Ready` on success.
    ///
    /// On failure, the provider is left unusable and the error is returned. The provider does not
    /// fall back to anything by itself.
    async fn initialize(&self, context: EvaluationContext) -> Result<()>;

    /// Record a new ambient context. Remote providers also re-identify the caller with their
    /// vendor and emit `ConfigurationChanged`.
    async fn on_context_change(
        &self,
        old_context: &EvaluationContext,
        new_context: &EvaluationContext,
    ) -> Result<()>;

    fn resolve_boolean(
        &self,
        key: &str,
        default: bool,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<bool>;

    fn resolve_string(
        &self,
        key: &str,
        default: &str,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<String>;

    fn resolve_number(
        &self,
        key: &str,
        default: f64,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<f64>;

    fn resolve_object(
        &self,
        key: &str,
        default: &Value,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<Value>;

    /// Re-fetch the backing state without tearing the provider down. Emits
    /// `ConfigurationChanged` on success. On failure, the previous state stays in use.
    async fn reload(&self) -> Result<()>;

    /// Release all resources. Idempotent.
    async fn shutdown(&self);

    /// Subscribe to lifecycle events of this provider.
    fn add_handler(&self, kind: ProviderEventKind, handler: EventHandler) -> Subscription;

    /// Keys of the flags currently known to the provider.
    fn flag_keys(&self) -> Vec<String>;

    /// When the current state was fetched, if the provider has fetched anything.
    fn fetched_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}
