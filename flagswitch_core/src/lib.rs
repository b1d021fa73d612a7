//! `flagswitch_core` is the engine behind `flagswitch`. If you're an application developer, you
//! probably want the `flagswitch` crate, which wraps these building blocks into switchable
//! providers and a client.
//!
//! # Overview
//!
//! [`Environment`](environment::Environment) is the heart of offline evaluation. It is an
//! immutable, indexed form of an environment document (features, segments and feature states)
//! that answers "which feature state wins for this flag under this context" without any network
//! access. Resolution follows two ordered passes: the first segment-scoped state whose segment
//! matches the context wins, otherwise the first default state, otherwise nothing.
//!
//! Other offline formats ([GrowthBook features](formats::GrowthBookFeatures) and [LaunchDarkly
//! flag files](formats::LaunchDarklyFlagFile)) implement the same [`RuleDocument`] trait, so
//! providers can treat every offline document alike.
//!
//! Resolved records are turned into typed values by the [`eval`] module. Coercion never fails:
//! every evaluation produces a usable value along with a [`Reason`](eval::Reason) describing how
//! it was derived.
//!
//! [`DocumentStore`](document_store::DocumentStore) holds the currently active document snapshot.
//! Whenever a document changes, it is replaced completely, so readers always evaluate against one
//! consistent snapshot.
//!
//! [`DocumentFetcher`](document_fetcher::DocumentFetcher) loads documents from HTTP(S) URLs or
//! local files, bypassing intermediary caches. [`Poller`](poller::Poller) runs a background task
//! that refreshes state periodically.
//!
//! [`EventEmitter`](events::EventEmitter) is a small typed publish/subscribe utility that
//! providers use to announce lifecycle events.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod document_fetcher;
pub mod document_store;
pub mod environment;
pub mod eval;
pub mod events;
pub mod formats;
pub mod poller;

mod attributes;
mod document;
mod error;
mod value;

pub use attributes::{AttributeValue, Attributes, EvaluationContext, ANONYMOUS};
pub use document::{Resolved, RuleDocument};
pub use error::{Error, FetchError, ResolutionError, Result};
