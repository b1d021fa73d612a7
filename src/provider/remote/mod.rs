//! Providers that ask a remote vendor for evaluated flags.
//!
//! A [`RemoteProvider`] layers the provider lifecycle over a [`VendorClient`]. The vendor is asked
//! for all flags of an identity at once. The resulting [`FlagSnapshot`] is cached per identity and
//! flag reads are served from the cache, so reads stay synchronous.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use flagswitch_core::{
    eval::{boolean_value, number_value, object_value, string_value, ResolutionDetails, StateRecord},
    events::{EventHandler, ProviderEventKind, Subscription},
    poller::{Poller, PollerConfig},
    Error, EvaluationContext, ResolutionError, Result,
};

use super::{guard_resolution, FeatureProvider, ProviderMetadata, ProviderState, ProviderStatus};

mod flagd;
mod flagsmith;
mod launchdarkly;

pub use flagd::FlagdClient;
pub use flagsmith::FlagsmithClient;
pub use launchdarkly::LaunchDarklyClient;

/// Number of identities whose snapshots are kept. The cache is emptied when it is full.
const MAX_CACHED_IDENTITIES: usize = 64;

/// Marks a vendor as set up. Share one between provider instances to run vendor setup once for
/// all of them.
pub type VendorSetup = Arc<OnceCell<()>>;

/// The subset of a vendor SDK a [`RemoteProvider`] depends on.
#[async_trait]
pub trait VendorClient: Send + Sync + 'static {
    /// One-time setup, run by the first successful `initialize` of the provider.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Evaluate all flags for `context`.
    async fn fetch_flags(&self, context: &EvaluationContext) -> Result<FlagSnapshot>;
}

/// All flags evaluated by a vendor for a single identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub flags: HashMap<String, RemoteFlag>,
}

impl FlagSnapshot {
    pub fn new() -> FlagSnapshot {
        FlagSnapshot::default()
    }

    pub fn with_flag(mut self, key: impl Into<String>, flag: RemoteFlag) -> FlagSnapshot {
        self.flags.insert(key.into(), flag);
        self
    }
}

impl FromIterator<(String, RemoteFlag)> for FlagSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, RemoteFlag)>>(iter: T) -> Self {
        FlagSnapshot {
            flags: iter.into_iter().collect(),
        }
    }
}

/// A single flag as evaluated by a vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteFlag {
    pub value: Option<Value>,
    /// Whether the flag is on. Only reported by some vendors.
    pub enabled: Option<bool>,
    pub variant: Option<String>,
}

impl RemoteFlag {
    pub fn with_value(value: impl Into<Value>) -> RemoteFlag {
        RemoteFlag {
            value: Some(value.into()),
            ..RemoteFlag::default()
        }
    }
}

impl StateRecord for RemoteFlag {
    fn enabled(&self) -> Option<bool> {
        self.enabled
    }

    fn value(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| !v.is_null())
    }
}

/// A provider backed by a remote vendor.
pub struct RemoteProvider<C: VendorClient> {
    inner: Arc<Inner<C>>,
    poll: Option<PollerConfig>,
    poller: Mutex<Option<Poller>>,
}

struct Inner<C> {
    state: ProviderState,
    client: C,
    setup: VendorSetup,
    init_timeout: Duration,
    snapshots: RwLock<HashMap<String, Arc<FlagSnapshot>>>,
    fetched_at: RwLock<Option<DateTime<Utc>>>,
}

impl<C: VendorClient> Inner<C> {
    fn snapshot(&self, identity: &str) -> Option<Arc<FlagSnapshot>> {
        self.snapshots
            .read()
            .expect("thread holding snapshots lock should not panic")
            .get(identity)
            .cloned()
    }

    /// Fetch the flags of `context` and cache them. Returns whether they differ from the cached
    /// ones.
    async fn identify(&self, context: &EvaluationContext) -> Result<bool> {
        let identity = context.identity();
        log::debug!(target: "flagswitch", provider_id = self.state.id(), identity; "fetching flags");

        let snapshot = Arc::new(self.client.fetch_flags(context).await?);

        let mut snapshots = self
            .snapshots
            .write()
            .expect("thread holding snapshots lock should not panic");
        if snapshots.len() >= MAX_CACHED_IDENTITIES && !snapshots.contains_key(identity) {
            snapshots.clear();
        }
        let previous = snapshots.insert(identity.to_owned(), snapshot.clone());
        drop(snapshots);

        *self
            .fetched_at
            .write()
            .expect("thread holding fetched_at lock should not panic") = Some(Utc::now());

        Ok(previous.map_or(true, |previous| *previous != *snapshot))
    }

    async fn refresh(&self, always_notify: bool) -> Result<()> {
        self.state.begin_refresh()?;
        let context = self.state.context();
        let (result, changed) = match self.identify(&context).await {
            Ok(changed) => (Ok(()), changed),
            Err(err) => (Err(err), false),
        };
        self.state.finish_refresh(&result, always_notify || changed);
        result
    }
}

impl<C: VendorClient> RemoteProvider<C> {
    pub fn new(
        metadata: ProviderMetadata,
        client: C,
        init_timeout: Duration,
        poll: Option<PollerConfig>,
    ) -> RemoteProvider<C> {
        RemoteProvider::with_setup(metadata, client, VendorSetup::default(), init_timeout, poll)
    }

    /// Create a provider that skips vendor setup once `setup` has been completed by any other
    /// provider sharing it.
    pub fn with_setup(
        metadata: ProviderMetadata,
        client: C,
        setup: VendorSetup,
        init_timeout: Duration,
        poll: Option<PollerConfig>,
    ) -> RemoteProvider<C> {
        RemoteProvider {
            inner: Arc::new(Inner {
                state: ProviderState::new(metadata),
                client,
                setup,
                init_timeout,
                snapshots: RwLock::new(HashMap::new()),
                fetched_at: RwLock::new(None),
            }),
            poll,
            poller: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &C {
        &self.inner.client
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

        let inner = Arc::downgrade(&self.inner);
        *poller = Some(Poller::spawn(config, move || {
            let inner = inner.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    let _ = inner.refresh(false).await;
                }
            }
        }));
    }

    async fn setup_and_identify(&self, context: &EvaluationContext) -> Result<()> {
        let inner = &self.inner;
        inner
            .setup
            .get_or_try_init(|| async {
                log::debug!(target: "flagswitch", provider_id = inner.state.id(); "setting up vendor client");
                inner.client.setup().await
            })
            .await?;
        inner.identify(context).await?;
        Ok(())
    }

    fn evaluate<T: Clone>(
        &self,
        key: &str,
        default: T,
        context: Option<&EvaluationContext>,
        coerce: impl FnOnce(&RemoteFlag, T) -> T,
    ) -> ResolutionDetails<T> {
        let inner = &self.inner;
        guard_resolution(inner.state.id(), key, default, |default| {
            inner.state.ensure_ready()?;

            let snapshot = match context {
                Some(context) => inner.snapshot(context.identity()),
                None => inner.snapshot(inner.state.context().identity()),
            }
            .ok_or(ResolutionError::IdentityNotLoaded)?;

            Ok(match snapshot.flags.get(key) {
                Some(flag) => {
                    ResolutionDetails::cached(coerce(flag, default), flag.variant.clone())
                }
                None => ResolutionDetails::default_value(default),
            })
        })
    }
}

#[async_trait]
impl<C: VendorClient> FeatureProvider for RemoteProvider<C> {
    fn metadata(&self) -> &ProviderMetadata {
        self.inner.state.metadata()
    }

    fn status(&self) -> ProviderStatus {
        self.inner.state.status()
    }

    async fn initialize(&self, context: EvaluationContext) -> Result<()> {
        let state = &self.inner.state;
        state.begin_initialize(context.clone())?;

        let result = match tokio::time::timeout(
            self.inner.init_timeout,
            self.setup_and_identify(&context),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::VendorInit(error_chain(&err))),
            Err(_) => Err(Error::VendorInit(format!(
                "not ready after {:?}",
                self.inner.init_timeout
            ))),
        };
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
        let state = &self.inner.state;
        let previous = state.context();
        state.set_context(new_context.clone());
        if let Err(err) = state.ensure_ready() {
            return Err(match err {
                ResolutionError::ProviderShutDown => Error::ProviderShutDown,
                _ => Error::ProviderNotReady,
            });
        }

        match self.inner.identify(new_context).await {
            Ok(_) => {
                state.emit(ProviderEventKind::ConfigurationChanged, None);
                Ok(())
            }
            Err(err) => {
                // Keep serving the last identity that has a snapshot.
                let restored = state.restore_context(new_context, previous);
                log::warn!(target: "flagswitch", provider_id = state.id(), restored; "failed to identify new context: {err}");
                state.emit(ProviderEventKind::Error, Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn resolve_boolean(
        &self,
        key: &str,
        default: bool,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<bool> {
        self.evaluate(key, default, context, |flag, default| {
            flag.enabled
                .unwrap_or_else(|| boolean_value(Some(flag), default))
        })
    }

    fn resolve_string(
        &self,
        key: &str,
        default: &str,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<String> {
        self.evaluate(key, default.to_owned(), context, |flag, default| {
            string_value(Some(flag), &default)
        })
    }

    fn resolve_number(
        &self,
        key: &str,
        default: f64,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<f64> {
        self.evaluate(key, default, context, |flag, default| {
            number_value(Some(flag), default)
        })
    }

    fn resolve_object(
        &self,
        key: &str,
        default: &Value,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<Value> {
        self.evaluate(key, default.clone(), context, |flag, default| {
            object_value(Some(flag), &default)
        })
    }

    async fn reload(&self) -> Result<()> {
        self.inner.refresh(true).await
    }

    async fn shutdown(&self) {
        let state = &self.inner.state;
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

        self.inner
            .snapshots
            .write()
            .expect("thread holding snapshots lock should not panic")
            .clear();
        state.finish_shutdown();
    }

    fn add_handler(&self, kind: ProviderEventKind, handler: EventHandler) -> Subscription {
        self.inner.state.add_handler(kind, handler)
    }

    fn flag_keys(&self) -> Vec<String> {
        let context = self.inner.state.context();
        let mut keys: Vec<String> = self
            .inner
            .snapshot(context.identity())
            .map(|snapshot| snapshot.flags.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn fetched_at(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .fetched_at
            .read()
            .expect("thread holding fetched_at lock should not panic")
    }
}

/// Render an error with all of its sources, e.g. `failed to fetch: connection refused`.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Join `path` onto `base`, treating `base` as a directory even without a trailing slash.
pub(crate) fn join_url(base: &str, path: &str) -> Result<url::Url> {
    let mut base = url::Url::parse(base).map_err(Error::InvalidUrl)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(path).map_err(Error::InvalidUrl)
}
