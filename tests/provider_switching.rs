use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use flagswitch::{
    provider::{
        remote::{FlagSnapshot, RemoteFlag, RemoteProvider, VendorClient, VendorSetup},
        OfflineProvider,
    },
    registry::{self, ProviderEntry, ProviderRegistry},
    ChoiceStore, Client, ClientConfig, Error, EvaluationContext, FeatureProvider,
    FlagsmithConfig, MemoryChoiceStore, ProviderEvent, ProviderEventKind, ProviderMetadata,
    ProviderMode, ProviderStatus, Result,
};
use flagswitch_core::{
    document_fetcher::{DocumentFetcher, DocumentLocation},
    environment::Environment,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_data(path: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test-data")
        .join(path)
        .to_string_lossy()
        .into_owned()
}

/// A choice store whose contents the test can inspect.
#[derive(Clone, Default)]
struct SharedStore(Arc<MemoryChoiceStore>);

impl ChoiceStore for SharedStore {
    fn load(&self) -> Option<String> {
        self.0.load()
    }

    fn save(&self, provider_id: &str) -> Result<()> {
        self.0.save(provider_id)
    }
}

fn broken_provider(metadata: ProviderMetadata) -> Arc<dyn FeatureProvider> {
    Arc::new(OfflineProvider::<Environment>::new(
        metadata,
        DocumentFetcher::new(DocumentLocation::File(PathBuf::from(
            "/nonexistent/flagswitch/environment.json",
        ))),
        None,
    ))
}

#[tokio::test]
async fn legacy_choice_is_normalized() {
    init();
    let store = SharedStore::default();
    store.save("flagsmith").unwrap();

    let client = ClientConfig::new()
        .choice_store(store.clone())
        .flagsmith(FlagsmithConfig {
            environment_file: test_data("flagsmith/environment.json"),
            ..FlagsmithConfig::default()
        })
        .to_client();
    client.ensure_active().await.unwrap();

    assert_eq!(
        client.active_provider_id().as_deref(),
        Some(registry::FLAGSMITH_OFFLINE)
    );
    assert!(!client.fallback_occurred());
    // Normalization is applied when reading only.
    assert_eq!(store.load().as_deref(), Some("flagsmith"));
}

#[tokio::test]
async fn failed_activation_falls_back_once() {
    init();
    let environment = std::env::temp_dir().join(format!(
        "flagswitch-fallback-{}.json",
        std::process::id()
    ));
    std::fs::copy(test_data("flagsmith/environment.json"), &environment).unwrap();

    let store = SharedStore::default();
    store.save("broken").unwrap();

    let registry = ProviderRegistry::builtin().register(ProviderEntry::new(
        ProviderMetadata::new("broken", "Broken", ProviderMode::Offline),
        |metadata, _| Ok(broken_provider(metadata)),
    ));
    let client = ClientConfig::new()
        .registry(registry)
        .choice_store(store.clone())
        .flagsmith(FlagsmithConfig {
            environment_file: environment.to_string_lossy().into_owned(),
            ..FlagsmithConfig::default()
        })
        .to_client();

    let errors = Arc::new(AtomicUsize::new(0));
    let _ = client.add_handler(ProviderEventKind::Error, {
        let errors = errors.clone();
        Arc::new(move |_: &ProviderEvent| {
            errors.fetch_add(1, Ordering::SeqCst);
        })
    });

    client.ensure_active().await.unwrap();
    assert_eq!(
        client.active_provider_id().as_deref(),
        Some(registry::FLAGSMITH_OFFLINE)
    );
    assert!(client.fallback_occurred());
    assert_eq!(store.load().as_deref(), Some(registry::FLAGSMITH_OFFLINE));
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // The default provider now fails too: no further fallback.
    std::fs::remove_file(&environment).unwrap();
    let active = client.active_provider().unwrap();
    assert!(matches!(
        client.reinitialize().await,
        Err(Error::DocumentFetch { .. })
    ));
    assert_eq!(active.status(), ProviderStatus::Ready);
    assert!(client.get_boolean_value(
        "new-badge",
        false,
        Some(&EvaluationContext::for_user("pradyun"))
    ));
}

#[tokio::test]
async fn failed_default_provider_is_fatal() {
    init();
    let registry = ProviderRegistry::builtin().register(ProviderEntry::new(
        ProviderMetadata::new(registry::FLAGSMITH_OFFLINE, "Broken", ProviderMode::Offline),
        |metadata, _| Ok(broken_provider(metadata)),
    ));
    let client = ClientConfig::new().registry(registry).to_client();

    assert!(client.ensure_active().await.is_err());
    assert!(client.active_provider().is_none());
    assert!(!client.fallback_occurred());
    assert_eq!(client.get_string_value("cta-color", "blue", None), "blue");
}

/// Answers with a greeting for the identity. Fetches for `slow` block until released.
#[derive(Default)]
struct GreetingVendor {
    setups: AtomicUsize,
    fetches: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl VendorClient for GreetingVendor {
    async fn setup(&self) -> Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_flags(&self, context: &EvaluationContext) -> Result<FlagSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let identity = context.identity().to_owned();
        if identity == "slow" {
            self.release.notified().await;
        }
        Ok(FlagSnapshot::new().with_flag(
            "greeting",
            RemoteFlag::with_value(format!("hello {identity}")),
        ))
    }
}

fn greeting_client(vendor: &Arc<GreetingVendor>) -> Client {
    let registry = ProviderRegistry::new("greeting").register(ProviderEntry::new(
        ProviderMetadata::new("greeting", "Greeting", ProviderMode::Online),
        {
            let vendor = vendor.clone();
            let setup = VendorSetup::default();
            move |metadata, _| {
                Ok(Arc::new(RemoteProvider::with_setup(
                    metadata,
                    SharedVendor(vendor.clone()),
                    setup.clone(),
                    Duration::from_secs(3),
                    None,
                )) as Arc<dyn FeatureProvider>)
            }
        },
    ));
    ClientConfig::new().registry(registry).to_client()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn explicit_contexts_win_over_in_flight_context_change() {
    init();
    let vendor = Arc::new(GreetingVendor::default());
    let client = greeting_client(&vendor);

    let alice = EvaluationContext::for_user("alice");
    let bob = EvaluationContext::for_user("bob");
    client.set_context(alice.clone()).await.unwrap();
    client.ensure_active().await.unwrap();
    client.set_context(bob.clone()).await.unwrap();

    let change = tokio::spawn({
        let client: Client = client.clone();
        async move { client.set_context(EvaluationContext::for_user("slow")).await }
    });
    while vendor.fetches.load(Ordering::SeqCst) < 3 {
        tokio::task::yield_now().await;
    }

    let readers: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            let context = if i % 2 == 0 { alice.clone() } else { bob.clone() };
            tokio::spawn(async move {
                let greeting = client.get_string_value("greeting", "", Some(&context));
                (context.identity().to_owned(), greeting)
            })
        })
        .collect();
    for reader in readers {
        let (identity, greeting) = reader.await.unwrap();
        assert_eq!(greeting, format!("hello {identity}"));
    }

    vendor.release.notify_one();
    change.await.unwrap().unwrap();
    assert_eq!(client.get_string_value("greeting", "", None), "hello slow");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn context_set_during_activation_reaches_the_new_provider() {
    init();
    let vendor = Arc::new(GreetingVendor::default());
    let client = greeting_client(&vendor);
    client
        .set_context(EvaluationContext::for_user("slow"))
        .await
        .unwrap();

    let activation = tokio::spawn({
        let client = client.clone();
        async move { client.ensure_active().await.map(|_| ()) }
    });
    while vendor.fetches.load(Ordering::SeqCst) < 1 {
        tokio::task::yield_now().await;
    }

    // No provider is active yet, so only the client records this context.
    client
        .set_context(EvaluationContext::for_user("bob"))
        .await
        .unwrap();
    vendor.release.notify_one();
    activation.await.unwrap().unwrap();

    assert_eq!(client.context().targeting_key(), Some("bob"));
    assert_eq!(client.get_string_value("greeting", "", None), "hello bob");
}

#[tokio::test]
async fn vendor_setup_survives_reinitialize() {
    init();
    let vendor = Arc::new(GreetingVendor::default());
    let client = greeting_client(&vendor);
    let first = client.ensure_active().await.unwrap();
    client.reinitialize().await.unwrap();

    assert_eq!(first.status(), ProviderStatus::Shutdown);
    assert_eq!(vendor.setups.load(Ordering::SeqCst), 1);
    assert_eq!(vendor.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(
        client.get_string_value("greeting", "", None),
        "hello anonymous"
    );
}

struct SharedVendor(Arc<GreetingVendor>);

#[async_trait]
impl VendorClient for SharedVendor {
    async fn setup(&self) -> Result<()> {
        self.0.setup().await
    }

    async fn fetch_flags(&self, context: &EvaluationContext) -> Result<FlagSnapshot> {
        self.0.fetch_flags(context).await
    }
}
