use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, RwLock,
};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;

use flagswitch_core::{
    eval::ResolutionDetails,
    events::{EventEmitter, EventHandler, ProviderEvent, ProviderEventKind, Subscription},
    Error, EvaluationContext, ResolutionError, Result,
};

use crate::{
    mirror::{BackendMirror, MirroredFlags},
    provider::{FeatureProvider, ProviderMetadata, ProviderStatus},
    ClientConfig,
};

type PendingActivation = Shared<BoxFuture<'static, Result<Arc<dyn FeatureProvider>>>>;

/// Owns the active provider and exposes a single evaluation facade to the application.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Activation
///
/// The client starts without an active provider. [`Client::ensure_active()`] activates the stored
/// provider choice (or the configured initial provider). If that provider fails to initialize and
/// is not the registry's default, the stored choice is switched to the default and activation is
/// retried once; [`Client::fallback_occurred()`] reports that this happened.
///
/// Concurrent callers of `ensure_active()` share a single activation.
///
/// # Flag reads
///
/// Flag reads are synchronous and never fail. Before a provider is active, they return the
/// default value with an `ERROR` reason. A context passed to a read is always used for that read,
/// even while [`Client::set_context()`] is in flight.
///
/// # Examples
/// ```no_run
/// # async fn test() -> flagswitch::Result<()> {
/// # use flagswitch::{ClientConfig, EvaluationContext};
/// let client = ClientConfig::from_env().to_client();
/// client.ensure_active().await?;
///
/// let user = EvaluationContext::for_user("pradyun");
/// let show_badge = client.get_boolean_value("new-badge", false, Some(&user));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    active: RwLock<Option<ActiveProvider>>,
    pending: Mutex<Option<PendingActivation>>,
    context: RwLock<EvaluationContext>,
    emitter: EventEmitter<ProviderEvent>,
    fallback_occurred: AtomicBool,
    /// Serializes activations.
    switch_lock: tokio::sync::Mutex<()>,
    mirror: Option<BackendMirror>,
}

struct ActiveProvider {
    id: String,
    provider: Arc<dyn FeatureProvider>,
    forwarding: Vec<Subscription>,
}

/// Health summary of a [`Client`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    /// Id of the active provider, if any.
    pub provider_id: Option<String>,
    pub provider_status: Option<ProviderStatus>,
    pub fallback_occurred: bool,
    /// When the active provider last fetched its state.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Client {
    /// Create a new `Client` using the specified configuration. No provider is activated yet.
    ///
    /// ```
    /// # use flagswitch::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::new());
    /// ```
    pub fn new(config: ClientConfig) -> Client {
        let mirror = config
            .mirror_url
            .as_deref()
            .and_then(|url| match BackendMirror::new(url) {
                Ok(mirror) => Some(mirror),
                Err(err) => {
                    log::warn!(target: "flagswitch", url; "ignoring backend mirror: {err}");
                    None
                }
            });

        Client {
            inner: Arc::new(ClientInner {
                config,
                active: RwLock::new(None),
                pending: Mutex::new(None),
                context: RwLock::new(EvaluationContext::default()),
                emitter: EventEmitter::new(),
                fallback_occurred: AtomicBool::new(false),
                switch_lock: tokio::sync::Mutex::new(()),
                mirror,
            }),
        }
    }

    /// Return the active provider, activating the stored choice first if needed.
    ///
    /// # Errors
    ///
    /// Returns the initialization error of the default provider if both the stored choice and the
    /// default failed to initialize.
    pub async fn ensure_active(&self) -> Result<Arc<dyn FeatureProvider>> {
        if let Some(provider) = self.active_provider() {
            return Ok(provider);
        }

        let activation = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .expect("thread holding pending lock should not panic");
            match &*pending {
                Some(activation) => activation.clone(),
                None => {
                    let inner = self.inner.clone();
                    let activation = async move { inner.boot().await }.boxed().shared();
                    *pending = Some(activation.clone());
                    activation
                }
            }
        };

        let result = activation.clone().await;

        let mut pending = self
            .inner
            .pending
            .lock()
            .expect("thread holding pending lock should not panic");
        if pending
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&activation))
        {
            *pending = None;
        }

        result
    }

    /// Initialize the current provider choice from scratch, replacing the active provider.
    ///
    /// Never falls back: on failure, the error is returned and the previously active provider (if
    /// any) stays active.
    pub async fn reinitialize(&self) -> Result<()> {
        let inner = &self.inner;
        let _switch = inner.switch_lock.lock().await;
        let provider_id = inner.current_choice();
        inner.activate(&provider_id).await?;
        Ok(())
    }

    /// Switch to another provider and persist the choice.
    ///
    /// The new provider is initialized before the current one is shut down. If it fails, the
    /// current provider stays active and the stored choice is left unchanged.
    pub async fn select_provider(&self, provider_id: &str) -> Result<()> {
        let inner = &self.inner;
        let registry = &inner.config.registry;
        let provider_id = registry.normalize(provider_id);
        if registry.get(&provider_id).is_none() {
            return Err(Error::UnknownProvider(provider_id));
        }

        let _switch = inner.switch_lock.lock().await;
        inner.activate(&provider_id).await?;
        inner.fallback_occurred.store(false, Ordering::SeqCst);
        inner.config.choice_store.save(&provider_id)
    }

    /// Replace the ambient evaluation context and propagate it to the active provider.
    pub async fn set_context(&self, context: EvaluationContext) -> Result<()> {
        let old_context = std::mem::replace(
            &mut *self
                .inner
                .context
                .write()
                .expect("thread holding context lock should not panic"),
            context.clone(),
        );

        let Some(provider) = self.active_provider() else {
            return Ok(());
        };
        let result = provider.on_context_change(&old_context, &context).await;
        if let Err(err) = &result {
            log::warn!(target: "flagswitch", provider_id = provider.metadata().id.as_str(); "failed to propagate context change: {err}");
        }
        result
    }

    /// The ambient evaluation context.
    pub fn context(&self) -> EvaluationContext {
        self.inner.context()
    }

    /// Reload the active provider's state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotReady`] if no provider is active, or the provider's reload error.
    /// A failed reload keeps the previous state in use.
    pub async fn reload(&self) -> Result<()> {
        let provider = self.active_provider().ok_or(Error::ProviderNotReady)?;
        provider.reload().await
    }

    /// Shut down the active provider and drop all event handlers.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let _switch = inner.switch_lock.lock().await;
        let active = inner
            .active
            .write()
            .expect("thread holding active provider lock should not panic")
            .take();
        if let Some(active) = active {
            active.retire().await;
        }
        inner.emitter.clear();
    }

    /// Subscribe to events of the active provider. The subscription survives provider switches.
    ///
    /// `Ready` is emitted once a provider has become active, `ConfigurationChanged` when its state
    /// changed and `Error` when initializing or refreshing it failed.
    pub fn add_handler(&self, kind: ProviderEventKind, handler: EventHandler) -> Subscription {
        self.inner.emitter.add_handler(kind, handler)
    }

    pub fn get_boolean_value(
        &self,
        key: &str,
        default: bool,
        context: Option<&EvaluationContext>,
    ) -> bool {
        self.get_boolean_details(key, default, context).value
    }

    pub fn get_string_value(
        &self,
        key: &str,
        default: &str,
        context: Option<&EvaluationContext>,
    ) -> String {
        self.get_string_details(key, default, context).value
    }

    pub fn get_number_value(
        &self,
        key: &str,
        default: f64,
        context: Option<&EvaluationContext>,
    ) -> f64 {
        self.get_number_details(key, default, context).value
    }

    pub fn get_object_value(
        &self,
        key: &str,
        default: &Value,
        context: Option<&EvaluationContext>,
    ) -> Value {
        self.get_object_details(key, default, context).value
    }

    /// Resolve a boolean flag, reporting how the value was derived.
    ///
    /// # Examples
    /// ```
    /// # use flagswitch::{ClientConfig, Reason};
    /// let client = ClientConfig::new().to_client();
    /// // No provider is active yet.
    /// let details = client.get_boolean_details("new-badge", false, None);
    /// assert_eq!(details.value, false);
    /// assert_eq!(details.reason, Reason::Error);
    /// ```
    pub fn get_boolean_details(
        &self,
        key: &str,
        default: bool,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<bool> {
        match self.active_provider() {
            Some(provider) => provider.resolve_boolean(key, default, context),
            None => ResolutionDetails::error(default, ResolutionError::ProviderNotReady),
        }
    }

    pub fn get_string_details(
        &self,
        key: &str,
        default: &str,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<String> {
        match self.active_provider() {
            Some(provider) => provider.resolve_string(key, default, context),
            None => {
                ResolutionDetails::error(default.to_owned(), ResolutionError::ProviderNotReady)
            }
        }
    }

    pub fn get_number_details(
        &self,
        key: &str,
        default: f64,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<f64> {
        match self.active_provider() {
            Some(provider) => provider.resolve_number(key, default, context),
            None => ResolutionDetails::error(default, ResolutionError::ProviderNotReady),
        }
    }

    pub fn get_object_details(
        &self,
        key: &str,
        default: &Value,
        context: Option<&EvaluationContext>,
    ) -> ResolutionDetails<Value> {
        match self.active_provider() {
            Some(provider) => provider.resolve_object(key, default, context),
            None => ResolutionDetails::error(default.clone(), ResolutionError::ProviderNotReady),
        }
    }

    /// The active provider, if one has been activated.
    pub fn active_provider(&self) -> Option<Arc<dyn FeatureProvider>> {
        self.inner.active_provider()
    }

    pub fn active_provider_id(&self) -> Option<String> {
        self.inner
            .active
            .read()
            .expect("thread holding active provider lock should not panic")
            .as_ref()
            .map(|active| active.id.clone())
    }

    /// Whether activation had to fall back to the default provider.
    pub fn fallback_occurred(&self) -> bool {
        self.inner.fallback_occurred.load(Ordering::SeqCst)
    }

    /// Providers available for selection, in registration order.
    pub fn available_providers(&self) -> Vec<ProviderMetadata> {
        self.inner
            .config
            .registry
            .entries()
            .iter()
            .map(|entry| entry.metadata().clone())
            .collect()
    }

    pub fn status(&self) -> ClientStatus {
        let provider = self.active_provider();
        ClientStatus {
            provider_id: self.active_provider_id(),
            provider_status: provider.as_ref().map(|provider| provider.status()),
            fallback_occurred: self.fallback_occurred(),
            fetched_at: provider.and_then(|provider| provider.fetched_at()),
        }
    }

    /// Ask the backend flag mirror which flag values it evaluated for `user_id` under the active
    /// provider. Returns `Ok(None)` if no mirror is configured.
    pub async fn fetch_backend_flags(&self, user_id: &str) -> Result<Option<MirroredFlags>> {
        let Some(mirror) = &self.inner.mirror else {
            return Ok(None);
        };
        let provider_id = self
            .active_provider_id()
            .unwrap_or_else(|| self.inner.current_choice());
        let known_keys = self
            .active_provider()
            .map(|provider| provider.flag_keys())
            .unwrap_or_default();
        mirror
            .fetch(user_id, &provider_id, &known_keys)
            .await
            .map(Some)
    }
}

impl ClientInner {
    fn context(&self) -> EvaluationContext {
        self.context
            .read()
            .expect("thread holding context lock should not panic")
            .clone()
    }

    fn active_provider(&self) -> Option<Arc<dyn FeatureProvider>> {
        self.active
            .read()
            .expect("thread holding active provider lock should not panic")
            .as_ref()
            .map(|active| active.provider.clone())
    }

    /// Provider id to activate: the stored choice, else the configured initial provider.
    fn current_choice(&self) -> String {
        let stored = self.config.choice_store.load();
        let requested = stored
            .as_deref()
            .or(self.config.initial_provider.as_deref());
        self.config.registry.resolve_choice(requested)
    }

    /// First activation, falling back to the default provider once.
    async fn boot(&self) -> Result<Arc<dyn FeatureProvider>> {
        let _switch = self.switch_lock.lock().await;
        if let Some(provider) = self.active_provider() {
            return Ok(provider);
        }

        let provider_id = self.current_choice();
        let default_id = self.config.registry.default_id();
        match self.activate(&provider_id).await {
            Ok(provider) => Ok(provider),
            Err(err) if provider_id != default_id => {
                log::warn!(target: "flagswitch", provider_id = provider_id.as_str(), default_id; "provider failed to initialize, falling back to the default one: {err}");
                self.fallback_occurred.store(true, Ordering::SeqCst);
                if let Err(err) = self.config.choice_store.save(default_id) {
                    log::warn!(target: "flagswitch", "failed to store provider choice: {err}");
                }
                self.activate(default_id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Create and initialize `provider_id`, then make it the active provider and shut down the
    /// previous one. The provider is brought up to date with context changes made while it was
    /// initializing. Callers must hold `switch_lock`.
    async fn activate(&self, provider_id: &str) -> Result<Arc<dyn FeatureProvider>> {
        let provider = self
            .config
            .registry
            .create(provider_id, &self.config)?;

        let forwarding = [ProviderEventKind::ConfigurationChanged, ProviderEventKind::Error]
            .into_iter()
            .map(|kind| {
                let emitter = self.emitter.clone();
                provider.add_handler(
                    kind,
                    Arc::new(move |event: &ProviderEvent| emitter.emit(event)),
                )
            })
            .collect();

        let initial_context = self.context();
        if let Err(err) = provider.initialize(initial_context.clone()).await {
            provider.shutdown().await;
            return Err(err);
        }

        let previous = self
            .active
            .write()
            .expect("thread holding active provider lock should not panic")
            .replace(ActiveProvider {
                id: provider_id.to_owned(),
                provider: provider.clone(),
                forwarding,
            });
        log::info!(target: "flagswitch", provider_id; "provider activated");
        self.emitter
            .emit(&ProviderEvent::new(ProviderEventKind::Ready, provider_id));

        if let Some(previous) = previous {
            previous.retire().await;
        }

        // `set_context` calls made while the provider was initializing only reached the client.
        let context = self.context();
        if context != initial_context {
            if let Err(err) = provider.on_context_change(&initial_context, &context).await {
                log::warn!(target: "flagswitch", provider_id; "failed to propagate context change: {err}");
            }
        }
        Ok(provider)
    }
}

impl ActiveProvider {
    async fn retire(self) {
        for subscription in self.forwarding {
            subscription.remove();
        }
        log::debug!(target: "flagswitch", provider_id = self.id.as_str(); "shutting down provider");
        self.provider.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use flagswitch_core::eval::Reason;

    use super::*;
    use crate::{
        choice_store::{ChoiceStore, MemoryChoiceStore},
        config::{FlagsmithConfig, GrowthBookConfig},
        registry::{ProviderEntry, FLAGSMITH_OFFLINE, GROWTHBOOK},
        provider::ProviderMode,
    };

    fn test_data(path: &str) -> String {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("test-data")
            .join(path)
            .to_string_lossy()
            .into_owned()
    }

    fn config() -> ClientConfig {
        ClientConfig::new()
            .flagsmith(FlagsmithConfig {
                environment_file: test_data("flagsmith/environment.json"),
                ..FlagsmithConfig::default()
            })
            .growthbook(GrowthBookConfig {
                features_file: test_data("growthbook/features.json"),
            })
    }

    fn counter(client: &Client, kind: ProviderEventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let handler: EventHandler = {
            let count = count.clone();
            Arc::new(move |_: &ProviderEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _ = client.add_handler(kind, handler);
        count
    }

    #[tokio::test]
    async fn reads_before_activation_return_defaults() {
        let client = config().to_client();
        let details = client.get_string_details("cta-color", "red", None);
        assert_eq!(details.value, "red");
        assert_eq!(details.reason, Reason::Error);
        assert_eq!(details.error, Some(ResolutionError::ProviderNotReady));
        assert!(matches!(client.reload().await, Err(Error::ProviderNotReady)));
        assert_eq!(client.status().provider_id, None);
    }

    #[tokio::test]
    async fn activates_default_provider() {
        let client = config().to_client();
        let ready = counter(&client, ProviderEventKind::Ready);

        client.ensure_active().await.unwrap();
        client.ensure_active().await.unwrap();

        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert_eq!(client.active_provider_id().as_deref(), Some(FLAGSMITH_OFFLINE));
        assert!(!client.fallback_occurred());

        let pradyun = EvaluationContext::for_user("pradyun");
        assert!(client.get_boolean_value("new-badge", false, Some(&pradyun)));
        assert!(!client.get_boolean_value("new-badge", false, None));

        let status = client.status();
        assert_eq!(status.provider_status, Some(ProviderStatus::Ready));
        assert!(status.fetched_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_activations_share_one_outcome() {
        let initializations = Arc::new(AtomicUsize::new(0));
        let registry = {
            let initializations = initializations.clone();
            crate::registry::ProviderRegistry::builtin().register(ProviderEntry::new(
                ProviderMetadata::new(FLAGSMITH_OFFLINE, "Counted", ProviderMode::Offline),
                move |metadata, config| {
                    initializations.fetch_add(1, Ordering::SeqCst);
                    crate::registry::ProviderRegistry::builtin()
                        .get(FLAGSMITH_OFFLINE)
                        .unwrap()
                        .init(config)
                        .map(|provider| {
                            assert_eq!(provider.metadata().id, metadata.id);
                            provider
                        })
                },
            ))
        };
        let client = config().registry(registry).to_client();

        let (a, b, c) = tokio::join!(
            client.ensure_active(),
            client.ensure_active(),
            client.ensure_active()
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(initializations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn select_provider_switches_and_persists() {
        let store = Arc::new(MemoryChoiceStore::new());
        let client = config()
            .choice_store(SharedStore(store.clone()))
            .to_client();
        client.ensure_active().await.unwrap();

        let old = client.active_provider().unwrap();
        client.select_provider("GrowthBook").await.unwrap();

        assert_eq!(client.active_provider_id().as_deref(), Some(GROWTHBOOK));
        assert_eq!(store.load().as_deref(), Some(GROWTHBOOK));
        assert_eq!(old.status(), ProviderStatus::Shutdown);
        assert_eq!(
            client.get_string_value("cta-color", "red", Some(&EvaluationContext::for_user("pradyun"))),
            "green"
        );

        assert!(matches!(
            client.select_provider("split").await,
            Err(Error::UnknownProvider(_))
        ));
        assert_eq!(client.active_provider_id().as_deref(), Some(GROWTHBOOK));
    }

    #[tokio::test]
    async fn failed_switch_keeps_current_provider() {
        let store = Arc::new(MemoryChoiceStore::new());
        let client = ClientConfig::new()
            .flagsmith(FlagsmithConfig {
                environment_file: test_data("flagsmith/environment.json"),
                ..FlagsmithConfig::default()
            })
            .growthbook(GrowthBookConfig {
                features_file: "/nonexistent/features.json".to_owned(),
            })
            .choice_store(SharedStore(store.clone()))
            .to_client();
        client.ensure_active().await.unwrap();

        assert!(client.select_provider(GROWTHBOOK).await.is_err());
        assert_eq!(client.active_provider_id().as_deref(), Some(FLAGSMITH_OFFLINE));
        assert_eq!(
            client.active_provider().unwrap().status(),
            ProviderStatus::Ready
        );
        assert_eq!(store.load(), None);
    }

    #[tokio::test]
    async fn set_context_updates_ambient_reads() {
        let client = config().to_client();
        client.ensure_active().await.unwrap();
        assert!(!client.get_boolean_value("new-badge", false, None));

        client
            .set_context(EvaluationContext::for_user("pradyun"))
            .await
            .unwrap();
        assert!(client.get_boolean_value("new-badge", false, None));
        assert_eq!(client.context().targeting_key(), Some("pradyun"));
    }

    #[tokio::test]
    async fn context_set_before_activation_is_used() {
        let client = config().to_client();
        client
            .set_context(EvaluationContext::for_user("pradyun"))
            .await
            .unwrap();
        client.ensure_active().await.unwrap();
        assert!(client.get_boolean_value("new-badge", false, None));
    }

    #[tokio::test]
    async fn shutdown_deactivates() {
        let client = config().to_client();
        let provider = client.ensure_active().await.unwrap();
        client.shutdown().await;

        assert_eq!(provider.status(), ProviderStatus::Shutdown);
        assert!(client.active_provider().is_none());
        assert_eq!(
            client.get_number_details("max-items", 10.0, None).error,
            Some(ResolutionError::ProviderNotReady)
        );
    }

    #[tokio::test]
    async fn backend_flags_without_mirror() {
        let client = config().to_client();
        assert_eq!(client.fetch_backend_flags("pradyun").await.unwrap(), None);
    }

    struct SharedStore(Arc<MemoryChoiceStore>);

    impl ChoiceStore for SharedStore {
        fn load(&self) -> Option<String> {
            self.0.load()
        }

        fn save(&self, provider_id: &str) -> Result<()> {
            self.0.save(provider_id)
        }
    }
}
