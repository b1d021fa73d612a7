//! Runtime-switchable feature flag providers with offline rule evaluation.
//!
//! # Overview
//!
//! Applications read flags through a [`Client`], which owns exactly one active
//! [`FeatureProvider`]. Providers are interchangeable: switching between a local flagd daemon,
//! LaunchDarkly, GrowthBook and Flagsmith (offline or online) requires no changes in application
//! code.
//!
//! Offline providers download a rule document once and evaluate every flag locally. Remote
//! providers ask their vendor for all flags of the current identity and serve reads from that
//! snapshot.
//!
//! # Typed values
//!
//! Flags are read with one function per type:
//! - [`Client::get_boolean_value()`]
//! - [`Client::get_string_value()`]
//! - [`Client::get_number_value()`]
//! - [`Client::get_object_value()`]
//!
//! Each has a `_details` variant returning [`ResolutionDetails`] with the value, a variant and a
//! [`Reason`]. Reads never fail: when anything goes wrong, the default value is returned with
//! [`Reason::Error`].
//!
//! Pass an [`EvaluationContext`] to every read. A context passed to a read always wins over the
//! ambient context set with [`Client::set_context()`].
//!
//! ```
//! # async fn test(client: flagswitch::Client) {
//! # use flagswitch::EvaluationContext;
//! let user = EvaluationContext::for_user("pradyun").with_attribute("plan", "pro");
//! let color = client.get_string_value("cta-color", "blue", Some(&user));
//! # }
//! ```
//!
//! # Provider selection
//!
//! The chosen provider id is persisted in a [`ChoiceStore`]. [`ProviderRegistry`] maps ids to
//! providers, normalizes legacy ids and names the default provider that is used when the chosen one
//! fails to initialize.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. They are only returned by lifecycle operations
//! (activation, provider switches, reloads). Flag reads report failures through
//! [`ResolutionDetails::error`] instead.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages, with
//! target `flagswitch`. Consider integrating a `log`-compatible logger implementation for better
//! visibility into provider operations.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod choice_store;
mod client;
mod config;
pub mod mirror;
pub mod provider;
pub mod registry;

#[doc(inline)]
pub use flagswitch_core::{
    eval::{Reason, ResolutionDetails},
    events::{EventHandler, ProviderEvent, ProviderEventKind, Subscription},
    poller::PollerConfig,
    AttributeValue, Attributes, Error, EvaluationContext, FetchError, ResolutionError, Result,
};

pub use choice_store::{ChoiceStore, FileChoiceStore, MemoryChoiceStore};
pub use client::{Client, ClientStatus};
pub use config::{ClientConfig, FlagdConfig, FlagsmithConfig, GrowthBookConfig, LaunchDarklyConfig};
pub use provider::{FeatureProvider, ProviderMetadata, ProviderMode, ProviderStatus};
pub use registry::{ProviderEntry, ProviderRegistry};
