use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use flagswitch_core::{AttributeValue, Error, EvaluationContext, FetchError, Result};

use super::{join_url, FlagSnapshot, RemoteFlag, VendorClient};
use crate::config::FlagsmithConfig;

const ENVIRONMENT_KEY_HEADER: &str = "X-Environment-Key";

/// Client of Flagsmith's identities endpoint. The caller is identified by its user id, which is
/// also sent as the `userId` trait along with the other context attributes.
#[derive(Clone)]
pub struct FlagsmithClient {
    client: reqwest::Client,
    url: Url,
    environment_key: Option<String>,
}

impl std::fmt::Debug for FlagsmithClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagsmithClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct IdentityRequest<'a> {
    identifier: &'a str,
    traits: Vec<Trait<'a>>,
}

#[derive(Debug, Serialize)]
struct Trait<'a> {
    trait_key: &'a str,
    trait_value: &'a AttributeValue,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    #[serde(default)]
    flags: Vec<IdentityFlag>,
}

#[derive(Debug, Deserialize)]
struct IdentityFlag {
    feature: FeatureRef,
    enabled: bool,
    #[serde(default)]
    feature_state_value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FeatureRef {
    name: String,
}

impl FlagsmithClient {
    pub fn new(config: &FlagsmithConfig) -> Result<FlagsmithClient> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| Error::VendorInit(err.to_string()))?;
        Ok(FlagsmithClient {
            client,
            url: join_url(&config.api_url, "identities/")?,
            environment_key: config.environment_key.clone(),
        })
    }

    fn environment_key(&self) -> Result<&str> {
        self.environment_key
            .as_deref()
            .ok_or_else(|| Error::VendorInit("Flagsmith environment key is not set".to_owned()))
    }

    async fn identify(
        &self,
        environment_key: &str,
        context: &EvaluationContext,
    ) -> std::result::Result<FlagSnapshot, FetchError> {
        let identifier = context.identity();
        let user_id = AttributeValue::from(identifier);
        let mut traits = vec![Trait {
            trait_key: "userId",
            trait_value: &user_id,
        }];
        traits.extend(
            context
                .attributes()
                .iter()
                .filter(|(name, value)| {
                    name.as_str() != "userId" && !matches!(value, AttributeValue::Null)
                })
                .map(|(name, value)| Trait {
                    trait_key: name,
                    trait_value: value,
                }),
        );

        let response = self
            .client
            .post(self.url.clone())
            .header(ENVIRONMENT_KEY_HEADER, environment_key)
            .json(&IdentityRequest { identifier, traits })
            .send()
            .await?
            .error_for_status()?;
        let response: IdentityResponse = serde_json::from_slice(&response.bytes().await?)?;

        Ok(response
            .flags
            .into_iter()
            .map(|flag| {
                (
                    flag.feature.name,
                    RemoteFlag {
                        value: flag.feature_state_value,
                        enabled: Some(flag.enabled),
                        variant: None,
                    },
                )
            })
            .collect())
    }
}

#[async_trait]
impl VendorClient for FlagsmithClient {
    async fn setup(&self) -> Result<()> {
        self.environment_key()?;
        Ok(())
    }

    async fn fetch_flags(&self, context: &EvaluationContext) -> Result<FlagSnapshot> {
        let environment_key = self.environment_key()?;
        self.identify(environment_key, context)
            .await
            .map_err(|source| Error::DocumentFetch {
                location: self.url.to_string(),
                source,
            })
    }
}
