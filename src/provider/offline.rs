use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use flagswitch_core::{
    document_fetcher::DocumentFetcher,
    document_store::{DocumentSnapshot, DocumentStore},
    eval::{boolean_value, number_value, object_value, string_value, ResolutionDetails},
    events::{EventHandler, ProviderEventKind, Subscription},
    poller::{Poller, PollerConfig},
    EvaluationContext, ResolutionError, Resolved, Result, RuleDocument,
};

use super::{
    guard_resolution, FeatureProvider, ProviderMetadata, ProviderState, ProviderStatus,
};

/// A provider that evaluates flags locally from a downloaded rule document.
///
/// Flag reads never touch the network: the document is loaded by
/// [`initialize`](FeatureProvider::initialize) and replaced by
/// [`reload`](FeatureProvider::reload) or, if configured, by a background poller. A failed reload
/// keeps the previous document in use.
pub struct OfflineProvider<D: RuleDocument> {
    shared: Arc<Shared<D>>,
    poll: Option<PollerConfig>,
    poller: Mutex<Option<Poller>>,
}

struct Shared<D> {
    state: ProviderState,
    fetcher: DocumentFetcher,
    store: DocumentStore<D>,
}

impl<D: RuleDocument> Shared<D> {
    /// Fetch the document again and swap it in.
    ///
    /// `ConfigurationChanged` is emitted when `always_notify` is set or the document content
    /// changed.
    async fn refresh(&self, always_notify: bool) -> Result<()> {
        self.state.begin_refresh()?;

        let result = self.fetcher.fetch::<D>().await.map(Arc::new);
        let (result, changed) = match result {
            Ok(snapshot) if self.state.status().is_ready() => {
                let previous = self.store.set(Arc::clone(&snapshot));
                let changed = previous.map_or(true, |previous| !previous.same_content(&snapshot));
                (Ok(()), changed)
            }
            // Shut down while fetching.
            Ok(_) => (Ok(()), false),
            Err(err) => (Err(err), false),
        };

        if changed {
            log::info!(target: "flagswitch", provider_id = self.state.id(); "document changed");
        }
        self.state.finish_refresh(&result, always_notify || changed);
        result
    }
}

impl<D: RuleDocument> OfflineProvider<D> {
    pub fn new(
        metadata: ProviderMetadata,
        fetcher: DocumentFetcher,
        poll: Option<PollerConfig>,
    ) -> OfflineProvider<D> {
        OfflineProvider {
            shared: Arc::new(Shared {
                state: ProviderState::new(metadata),
                fetcher,
                store: DocumentStore::new(),
            }),
            poll,
            poller: Mutex::new(None),
        }
    }

    /// The currently loaded document.
    pub fn snapshot(&self) -> Option<Arc<DocumentSnapshot<D>>> {
        self.shared.store.get()
    }

    fn start_poller(&self) {
        let Some(config) = self.poll.clone() else {
            return;
        };
        let mut poller = self
            .poller
            .lock()
            .expect("thread holding poller lock should not panic");
        if poller.is_some() {
            return;
        }

        let shared = Arc::downgrade(&self.shared);
        *poller = Some(Poller::spawn(config, move || {
            let shared = shared.clone();
            async move {
                if let Some(shared) = shared.upgrade() {
                    // Failures are logged and reported as events by `refresh`.
                    let _ = shared.refresh(false).await;
                }
            }
        }));
    }

    fn evaluate<T: Clone>(
        &self,
        key: &str,
        default: T,
        context: Option<&EvaluationContext>,
        coerce: impl FnOnce(Option<Resolved<'_>>, T) -> T,
    ) -> ResolutionDetails<T> {
        let state = &self.shared.state;
        guard_resolution(state.id(), key, default, |default| {
            state.ensure_ready()?;
            let snapshot = self
                .shared
                .store
                .get()
                .ok_or(ResolutionError::ProviderNotReady)?;

            let ambient;
            let context = match context {
                Some(context) => context,
                None => {
                    ambient = state.context();
                    &*ambient
                }
            };

            let resolved = snapshot.document.resolve(key, context);
            Ok(ResolutionDetails::static_value(coerce(resolved, default)))
        })
    }
}

#[async_trait]
impl<D: RuleDocument> FeatureProvider for OfflineProvider<D> {
    fn metadata(&self) -> &ProviderMetadata {
        self.shared.state.metadata()
    }

    fn status(&self) -> ProviderStatus {
        self.shared.state.status()
    }

    async fn initialize(&self, context: EvaluationContext) -> Result<()> {
        let state = &self.shared.state;
        state.begin_initialize(context)?;

        let result = self.shared.fetcher.fetch::<D>().await.map(|snapshot| {
            self.shared.store.set(Arc::new(snapshot));
        });
        if result.is_ok() {
            self.start_poller();
        }

        state.finish_initialize(&result);
        result
    }

    async fn on_context_change(
        &self,
        _old_context: &EvaluationContext,
        new_context: &EvaluationContext,
    ) -> Result<()> {
        // Evaluation is local and deterministic per context; nothing to refetch.
        self.shared.state.set_context(new_context.clone());
        Ok(())
    }

    fn resolve_boolean(
        &self,
        key: &str,
        default: bool,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<bool> {
        self.evaluate(key, default, context, |resolved, default| {
            boolean_value(resolved.as_ref(), default)
        })
    }

    fn resolve_string(
        &self,
        key: &str,
        default: &str,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<String> {
        self.evaluate(key, default.to_owned(), context, |resolved, default| {
            string_value(resolved.as_ref(), &default)
        })
    }

    fn resolve_number(
        &self,
        key: &str,
        default: f64,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<f64> {
        self.evaluate(key, default, context, |resolved, default| {
            number_value(resolved.as_ref(), default)
        })
    }

    fn resolve_object(
        &self,
        key: &str,
        default: &Value,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<Value> {
        self.evaluate(key, default.clone(), context, |resolved, default| {
            object_value(resolved.as_ref(), &default)
        })
    }

    async fn reload(&self) -> Result<()> {
        self.shared.refresh(true).await
    }

    async fn shutdown(&self) {
        let state = &self.shared.state;
        if !state.begin_shutdown() {
            return;
        }

        let poller = self
            .poller
            .lock()
            .expect("thread holding poller lock should not panic")
            .take();
        if let Some(poller) = poller {
            poller.shutdown().await;
        }

        self.shared.store.clear();
        state.finish_shutdown();
    }

    fn add_handler(&self, kind: ProviderEventKind, handler: EventHandler) -> Subscription {
        self.shared.state.add_handler(kind, handler)
    }

    fn flag_keys(&self) -> Vec<String> {
        self.shared
            .store
            .get()
            .map(|snapshot| snapshot.document.flag_keys())
            .unwrap_or_default()
    }

    fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.shared.store.get().map(|snapshot| snapshot.fetched_at)
    }
}
