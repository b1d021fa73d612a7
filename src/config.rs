use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use flagswitch_core::poller::PollerConfig;

use crate::{
    choice_store::{ChoiceStore, MemoryChoiceStore},
    registry::ProviderRegistry,
    Client,
};

/// Settings of the flagd provider, which talks to a local flagd daemon over OFREP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagdConfig {
    pub host: String,
    /// Port of flagd's OFREP (HTTP) service.
    pub port: u16,
    /// Use https to connect.
    pub tls: bool,
}

impl FlagdConfig {
    pub const DEFAULT_HOST: &'static str = "localhost";
    /// Default OFREP port of flagd.
    pub const DEFAULT_PORT: u16 = 8016;
    /// Upper bound for the provider to become ready.
    pub const INIT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Base URL of the daemon.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl Default for FlagdConfig {
    fn default() -> Self {
        FlagdConfig {
            host: FlagdConfig::DEFAULT_HOST.to_owned(),
            port: FlagdConfig::DEFAULT_PORT,
            tls: false,
        }
    }
}

/// Settings of both LaunchDarkly providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDarklyConfig {
    /// Location of the flag data file used by the offline provider.
    pub flags_file: String,
    /// Client-side id of the environment, required by the online provider.
    pub client_side_id: Option<String>,
    /// Base URI of the client-side evaluation service. Point it to a relay proxy if you use one.
    pub base_uri: String,
    /// Upper bound for the online provider to become ready.
    pub init_timeout: Duration,
}

impl LaunchDarklyConfig {
    pub const DEFAULT_FLAGS_FILE: &'static str = "./launchdarkly/ld-flags.json";
    pub const DEFAULT_BASE_URI: &'static str = "https://clientsdk.launchdarkly.com";
    pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(3);
}

impl Default for LaunchDarklyConfig {
    fn default() -> Self {
        LaunchDarklyConfig {
            flags_file: LaunchDarklyConfig::DEFAULT_FLAGS_FILE.to_owned(),
            client_side_id: None,
            base_uri: LaunchDarklyConfig::DEFAULT_BASE_URI.to_owned(),
            init_timeout: LaunchDarklyConfig::DEFAULT_INIT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrowthBookConfig {
    /// Location of the features document.
    pub features_file: String,
}

impl GrowthBookConfig {
    pub const DEFAULT_FEATURES_FILE: &'static str = "growthbook/features.json";
}

impl Default for GrowthBookConfig {
    fn default() -> Self {
        GrowthBookConfig {
            features_file: GrowthBookConfig::DEFAULT_FEATURES_FILE.to_owned(),
        }
    }
}

/// Settings of both Flagsmith providers.
#[derive(Clone, PartialEq, Eq)]
pub struct FlagsmithConfig {
    /// Location of the environment document used by the offline provider.
    pub environment_file: String,
    /// Environment key, required by the online provider.
    pub environment_key: Option<String>,
    /// Base URL of the Flagsmith API. Override for self-hosted instances.
    pub api_url: String,
    /// Timeout of each request made by the online provider. Also bounds its initialization.
    pub request_timeout: Duration,
}

impl FlagsmithConfig {
    pub const DEFAULT_ENVIRONMENT_FILE: &'static str = "flagsmith/environment.json";
    pub const DEFAULT_API_URL: &'static str = "https://edge.api.flagsmith.com/api/v1/";
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
}

impl Default for FlagsmithConfig {
    fn default() -> Self {
        FlagsmithConfig {
            environment_file: FlagsmithConfig::DEFAULT_ENVIRONMENT_FILE.to_owned(),
            environment_key: None,
            api_url: FlagsmithConfig::DEFAULT_API_URL.to_owned(),
            request_timeout: FlagsmithConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// The environment key is a secret.
impl fmt::Debug for FlagsmithConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagsmithConfig")
            .field("environment_file", &self.environment_file)
            .field(
                "environment_key",
                &self.environment_key.as_ref().map(|_| "<redacted>"),
            )
            .field("api_url", &self.api_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use flagswitch::{ClientConfig, GrowthBookConfig};
/// let client = ClientConfig::new()
///     .initial_provider("growthbook")
///     .growthbook(GrowthBookConfig {
///         features_file: "./growthbook/features.json".to_owned(),
///     })
///     .to_client();
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) initial_provider: Option<String>,
    pub(crate) flagd: FlagdConfig,
    pub(crate) launchdarkly: LaunchDarklyConfig,
    pub(crate) growthbook: GrowthBookConfig,
    pub(crate) flagsmith: FlagsmithConfig,
    pub(crate) poll: Option<PollerConfig>,
    pub(crate) mirror_url: Option<String>,
    pub(crate) registry: ProviderRegistry,
    pub(crate) choice_store: Arc<dyn ChoiceStore>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            initial_provider: None,
            flagd: FlagdConfig::default(),
            launchdarkly: LaunchDarklyConfig::default(),
            growthbook: GrowthBookConfig::default(),
            flagsmith: FlagsmithConfig::default(),
            poll: None,
            mirror_url: None,
            registry: ProviderRegistry::builtin(),
            choice_store: Arc::new(MemoryChoiceStore::new()),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("initial_provider", &self.initial_provider)
            .field("flagd", &self.flagd)
            .field("launchdarkly", &self.launchdarkly)
            .field("growthbook", &self.growthbook)
            .field("flagsmith", &self.flagsmith)
            .field("poll", &self.poll)
            .field("mirror_url", &self.mirror_url)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Create a configuration with default settings for every provider.
    pub fn new() -> ClientConfig {
        ClientConfig::default()
    }

    /// Create a configuration from environment variables, loading a `.env` file first if one
    /// exists.
    ///
    /// Recognized variables: `FLAGSWITCH_PROVIDER`, `FLAGD_HOST`, `FLAGD_PORT`, `FLAGD_TLS`,
    /// `LD_FLAGS_FILE`, `LD_CLIENT_SIDE_ID`, `LD_BASE_URI`, `LD_INIT_TIMEOUT_SECONDS`,
    /// `GROWTHBOOK_FEATURES_FILE`, `FLAGSMITH_ENV_FILE`, `FLAGSMITH_ENV_KEY`, `FLAGSMITH_API_URL`,
    /// `FLAGSMITH_REQUEST_TIMEOUT_SECONDS`, `FLAGSWITCH_POLL_INTERVAL_SECONDS` and
    /// `FLAGSWITCH_MIRROR_URL`. Unset, empty or malformed variables keep their defaults.
    pub fn from_env() -> ClientConfig {
        match dotenvy::dotenv() {
            Ok(path) => {
                log::debug!(target: "flagswitch", path:? = path; "loaded .env file");
            }
            Err(err) if err.not_found() => {}
            Err(err) => {
                log::warn!(target: "flagswitch", "failed to load .env file: {err}");
            }
        }
        ClientConfig::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a configuration from an arbitrary variable source.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientConfig {
        let vars = Vars { lookup };
        let mut config = ClientConfig::new();

        config.initial_provider = vars.string("FLAGSWITCH_PROVIDER");

        if let Some(host) = vars.string("FLAGD_HOST") {
            config.flagd.host = host;
        }
        if let Some(port) = vars.parse("FLAGD_PORT") {
            config.flagd.port = port;
        }
        if let Some(tls) = vars.flag("FLAGD_TLS") {
            config.flagd.tls = tls;
        }

        if let Some(file) = vars.string("LD_FLAGS_FILE") {
            config.launchdarkly.flags_file = file;
        }
        config.launchdarkly.client_side_id = vars.string("LD_CLIENT_SIDE_ID");
        if let Some(base_uri) = vars.string("LD_BASE_URI") {
            config.launchdarkly.base_uri = base_uri;
        }
        if let Some(timeout) = vars.seconds("LD_INIT_TIMEOUT_SECONDS") {
            config.launchdarkly.init_timeout = timeout;
        }

        if let Some(file) = vars.string("GROWTHBOOK_FEATURES_FILE") {
            config.growthbook.features_file = file;
        }

        if let Some(file) = vars.string("FLAGSMITH_ENV_FILE") {
            config.flagsmith.environment_file = file;
        }
        config.flagsmith.environment_key = vars.string("FLAGSMITH_ENV_KEY");
        if let Some(api_url) = vars.string("FLAGSMITH_API_URL") {
            config.flagsmith.api_url = api_url;
        }
        if let Some(timeout) = vars.seconds("FLAGSMITH_REQUEST_TIMEOUT_SECONDS") {
            config.flagsmith.request_timeout = timeout;
        }

        if let Some(interval) = vars.seconds("FLAGSWITCH_POLL_INTERVAL_SECONDS") {
            config = config.poll_interval(interval);
        }
        config.mirror_url = vars.string("FLAGSWITCH_MIRROR_URL");

        config
    }

    /// Provider to activate when no choice has been stored yet. Defaults to the registry's default
    /// provider.
    pub fn initial_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.initial_provider = Some(provider_id.into());
        self
    }

    pub fn flagd(mut self, flagd: FlagdConfig) -> Self {
        self.flagd = flagd;
        self
    }

    pub fn launchdarkly(mut self, launchdarkly: LaunchDarklyConfig) -> Self {
        self.launchdarkly = launchdarkly;
        self
    }

    pub fn growthbook(mut self, growthbook: GrowthBookConfig) -> Self {
        self.growthbook = growthbook;
        self
    }

    pub fn flagsmith(mut self, flagsmith: FlagsmithConfig) -> Self {
        self.flagsmith = flagsmith;
        self
    }

    /// Refresh provider state periodically. Polling is disabled by default.
    pub fn poll(mut self, poll: PollerConfig) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Refresh provider state every `interval`, with a jitter of up to a tenth of the interval.
    pub fn poll_interval(self, interval: Duration) -> Self {
        let jitter = PollerConfig::DEFAULT_POLL_JITTER.min(interval / 10);
        self.poll(
            PollerConfig::new()
                .with_interval(interval)
                .with_jitter(jitter),
        )
    }

    /// Base URL of the backend flag mirror, e.g. `http://localhost:8000/api`.
    pub fn mirror_url(mut self, mirror_url: impl Into<String>) -> Self {
        self.mirror_url = Some(mirror_url.into());
        self
    }

    /// Replace the set of available providers.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Where the chosen provider id is persisted. Defaults to memory.
    pub fn choice_store(mut self, choice_store: impl ChoiceStore + 'static) -> Self {
        self.choice_store = Arc::new(choice_store);
        self
    }

    pub fn flagd_config(&self) -> &FlagdConfig {
        &self.flagd
    }

    pub fn launchdarkly_config(&self) -> &LaunchDarklyConfig {
        &self.launchdarkly
    }

    pub fn growthbook_config(&self) -> &GrowthBookConfig {
        &self.growthbook
    }

    pub fn flagsmith_config(&self) -> &FlagsmithConfig {
        &self.flagsmith
    }

    pub fn poll_config(&self) -> Option<&PollerConfig> {
        self.poll.as_ref()
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use flagswitch::{ClientConfig, Client};
    /// let client: Client = ClientConfig::new().to_client();
    /// ```
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str) -> Option<T>
    where
        T::Err: fmt::Display,
    {
        let value = self.string(name)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                log::warn!(target: "flagswitch", variable = name; "ignoring malformed environment variable: {err}");
                None
            }
        }
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.string(name)
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
    }

    fn seconds(&self, name: &str) -> Option<Duration> {
        let seconds: f64 = self.parse(name)?;
        match Duration::try_from_secs_f64(seconds) {
            Ok(duration) if !duration.is_zero() => Some(duration),
            _ => {
                log::warn!(target: "flagswitch", variable = name; "ignoring non-positive duration");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]);
        assert_eq!(config.initial_provider, None);
        assert_eq!(config.flagd.base_url(), "http://localhost:8016");
        assert_eq!(config.flagsmith.request_timeout, Duration::from_secs(3));
        assert_eq!(config.launchdarkly.init_timeout, Duration::from_secs(3));
        assert_eq!(config.growthbook.features_file, "growthbook/features.json");
        assert!(config.poll.is_none());
    }

    #[test]
    fn reads_variables() {
        let config = config_from(&[
            ("FLAGSWITCH_PROVIDER", " growthbook "),
            ("FLAGD_HOST", "flagd.internal"),
            ("FLAGD_PORT", "9000"),
            ("FLAGD_TLS", "Yes"),
            ("FLAGSMITH_ENV_KEY", "ser.secret"),
            ("FLAGSMITH_REQUEST_TIMEOUT_SECONDS", "1.5"),
            ("FLAGSWITCH_POLL_INTERVAL_SECONDS", "10"),
        ]);
        assert_eq!(config.initial_provider.as_deref(), Some("growthbook"));
        assert_eq!(config.flagd.base_url(), "https://flagd.internal:9000");
        assert_eq!(config.flagsmith.environment_key.as_deref(), Some("ser.secret"));
        assert_eq!(config.flagsmith.request_timeout, Duration::from_millis(1500));
        let poll = config.poll.unwrap();
        assert_eq!(poll.interval, Duration::from_secs(10));
        assert_eq!(poll.jitter, Duration::from_secs(1));
    }

    #[test]
    fn malformed_variables_keep_defaults() {
        let config = config_from(&[
            ("FLAGD_PORT", "eighty"),
            ("LD_INIT_TIMEOUT_SECONDS", "-1"),
            ("FLAGSWITCH_POLL_INTERVAL_SECONDS", "0"),
            ("FLAGSWITCH_PROVIDER", "   "),
        ]);
        assert_eq!(config.flagd.port, FlagdConfig::DEFAULT_PORT);
        assert_eq!(
            config.launchdarkly.init_timeout,
            LaunchDarklyConfig::DEFAULT_INIT_TIMEOUT
        );
        assert!(config.poll.is_none());
        assert_eq!(config.initial_provider, None);
    }

    #[test]
    fn debug_redacts_environment_key() {
        let config = FlagsmithConfig {
            environment_key: Some("ser.secret".to_owned()),
            ..FlagsmithConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("ser.secret"));
        assert!(debug.contains("<redacted>"));
    }
}
