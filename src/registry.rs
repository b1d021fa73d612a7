//! The set of providers a [`Client`](crate::Client) can switch between.
use std::{collections::HashMap, fmt, sync::Arc};

use flagswitch_core::{
    document_fetcher::{DocumentFetcher, DocumentLocation},
    environment::Environment,
    formats::{GrowthBookFeatures, LaunchDarklyFlagFile},
    poller::PollerConfig,
    Error, Result, RuleDocument,
};

use crate::{
    config::{ClientConfig, FlagdConfig},
    provider::{
        remote::{
            FlagdClient, FlagsmithClient, LaunchDarklyClient, RemoteProvider, VendorClient,
            VendorSetup,
        },
        FeatureProvider, OfflineProvider, ProviderMetadata, ProviderMode,
    },
};

pub const FLAGD: &str = "flagd";
pub const LAUNCHDARKLY_OFFLINE: &str = "launchdarkly-offline";
pub const LAUNCHDARKLY_ONLINE: &str = "launchdarkly-online";
pub const GROWTHBOOK: &str = "growthbook";
pub const FLAGSMITH_OFFLINE: &str = "flagsmith-offline";
pub const FLAGSMITH_ONLINE: &str = "flagsmith-online";

/// Creates a provider instance from its metadata and the client configuration.
pub type ProviderFactory =
    Arc<dyn Fn(ProviderMetadata, &ClientConfig) -> Result<Arc<dyn FeatureProvider>> + Send + Sync>;

/// A provider the client can activate.
#[derive(Clone)]
pub struct ProviderEntry {
    metadata: ProviderMetadata,
    factory: ProviderFactory,
}

impl ProviderEntry {
    pub fn new(
        metadata: ProviderMetadata,
        factory: impl Fn(ProviderMetadata, &ClientConfig) -> Result<Arc<dyn FeatureProvider>>
            + Send
            + Sync
            + 'static,
    ) -> ProviderEntry {
        ProviderEntry {
            metadata,
            factory: Arc::new(factory),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn label(&self) -> &str {
        &self.metadata.label
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Create a new, uninitialized provider instance.
    pub fn init(&self, config: &ClientConfig) -> Result<Arc<dyn FeatureProvider>> {
        (self.factory)(self.metadata.clone(), config)
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Maps provider ids to entries.
///
/// Stored ids pass through [`ProviderRegistry::resolve_choice`], which maps legacy ids to their
/// current name and unknown ids to the default provider. The mapping is applied when reading only:
/// nothing is written back to the choice store.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
    default_id: String,
    legacy: HashMap<String, String>,
}

impl ProviderRegistry {
    /// Create an empty registry. `default_id` should name an entry registered later.
    pub fn new(default_id: impl Into<String>) -> ProviderRegistry {
        ProviderRegistry {
            entries: Vec::new(),
            default_id: default_id.into(),
            legacy: HashMap::new(),
        }
    }

    /// The built-in providers, with `flagsmith-offline` as the default.
    pub fn builtin() -> ProviderRegistry {
        ProviderRegistry::new(FLAGSMITH_OFFLINE)
            .register(ProviderEntry::new(
                ProviderMetadata::new(FLAGD, "flagd (local daemon)", ProviderMode::Online),
                {
                    let setup = VendorSetup::default();
                    move |metadata, config| {
                        remote(
                            metadata,
                            FlagdClient::new(&config.flagd)?,
                            &setup,
                            FlagdConfig::INIT_TIMEOUT,
                            config.poll.clone(),
                        )
                    }
                },
            ))
            .register(ProviderEntry::new(
                ProviderMetadata::new(
                    LAUNCHDARKLY_OFFLINE,
                    "LaunchDarkly (file)",
                    ProviderMode::Offline,
                ),
                |metadata, config| {
                    offline::<LaunchDarklyFlagFile>(
                        metadata,
                        &config.launchdarkly.flags_file,
                        config.poll.clone(),
                    )
                },
            ))
            .register(ProviderEntry::new(
                ProviderMetadata::new(
                    LAUNCHDARKLY_ONLINE,
                    "LaunchDarkly (online)",
                    ProviderMode::Online,
                ),
                {
                    let setup = VendorSetup::default();
                    move |metadata, config| {
                        remote(
                            metadata,
                            LaunchDarklyClient::new(&config.launchdarkly),
                            &setup,
                            config.launchdarkly.init_timeout,
                            config.poll.clone(),
                        )
                    }
                },
            ))
            .register(ProviderEntry::new(
                ProviderMetadata::new(GROWTHBOOK, "GrowthBook (file)", ProviderMode::Offline),
                |metadata, config| {
                    offline::<GrowthBookFeatures>(
                        metadata,
                        &config.growthbook.features_file,
                        config.poll.clone(),
                    )
                },
            ))
            .register(ProviderEntry::new(
                ProviderMetadata::new(
                    FLAGSMITH_OFFLINE,
                    "Flagsmith (offline)",
                    ProviderMode::Offline,
                ),
                |metadata, config| {
                    offline::<Environment>(
                        metadata,
                        &config.flagsmith.environment_file,
                        config.poll.clone(),
                    )
                },
            ))
            .register(ProviderEntry::new(
                ProviderMetadata::new(
                    FLAGSMITH_ONLINE,
                    "Flagsmith (online)",
                    ProviderMode::Online,
                ),
                {
                    let setup = VendorSetup::default();
                    move |metadata, config| {
                        remote(
                            metadata,
                            FlagsmithClient::new(&config.flagsmith)?,
                            &setup,
                            config.flagsmith.request_timeout,
                            config.poll.clone(),
                        )
                    }
                },
            ))
            .legacy_alias("flagsmith", FLAGSMITH_OFFLINE)
            .legacy_alias("launchdarkly", LAUNCHDARKLY_OFFLINE)
    }

    /// Add an entry, replacing any entry with the same id.
    pub fn register(mut self, entry: ProviderEntry) -> ProviderRegistry {
        match self.entries.iter().position(|e| e.id() == entry.id()) {
            Some(index) => self.entries[index] = entry,
            None => self.entries.push(entry),
        }
        self
    }

    pub fn with_default(mut self, default_id: impl Into<String>) -> ProviderRegistry {
        self.default_id = default_id.into();
        self
    }

    /// Map a retired id onto its current one.
    pub fn legacy_alias(
        mut self,
        legacy_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> ProviderRegistry {
        self.legacy.insert(legacy_id.into(), provider_id.into());
        self
    }

    /// Trim, lowercase and map legacy ids. Does not check that the id is registered.
    pub fn normalize(&self, provider_id: &str) -> String {
        let id = provider_id.trim().to_lowercase();
        match self.legacy.get(&id) {
            Some(current) => current.clone(),
            None => id,
        }
    }

    /// Turn a stored choice into the id of a registered provider.
    pub fn resolve_choice(&self, stored: Option<&str>) -> String {
        let Some(stored) = stored.filter(|id| !id.trim().is_empty()) else {
            return self.default_id.clone();
        };
        let id = self.normalize(stored);
        if self.get(&id).is_some() {
            id
        } else {
            log::warn!(target: "flagswitch", provider_id = stored; "unknown provider, using the default one");
            self.default_id.clone()
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|entry| entry.id() == provider_id)
    }

    /// All entries, in registration order.
    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    /// Look up `provider_id` and create a provider instance.
    pub(crate) fn create(
        &self,
        provider_id: &str,
        config: &ClientConfig,
    ) -> Result<Arc<dyn FeatureProvider>> {
        self.get(provider_id)
            .ok_or_else(|| Error::UnknownProvider(provider_id.to_owned()))?
            .init(config)
    }
}

fn offline<D: RuleDocument>(
    metadata: ProviderMetadata,
    location: &str,
    poll: Option<PollerConfig>,
) -> Result<Arc<dyn FeatureProvider>> {
    let fetcher = DocumentFetcher::new(DocumentLocation::parse(location)?);
    Ok(Arc::new(OfflineProvider::<D>::new(metadata, fetcher, poll)))
}

fn remote<C: VendorClient>(
    metadata: ProviderMetadata,
    client: C,
    setup: &VendorSetup,
    init_timeout: std::time::Duration,
    poll: Option<PollerConfig>,
) -> Result<Arc<dyn FeatureProvider>> {
    Ok(Arc::new(RemoteProvider::with_setup(
        metadata,
        client,
        setup.clone(),
        init_timeout,
        poll,
    )))
}
