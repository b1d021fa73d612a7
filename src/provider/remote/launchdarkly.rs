use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::{Map, Value};

use flagswitch_core::{Error, EvaluationContext, FetchError, Result};

use super::{join_url, FlagSnapshot, RemoteFlag, VendorClient};
use crate::config::LaunchDarklyConfig;

/// Client of LaunchDarkly's client-side evaluation endpoint.
///
/// The evaluation context is sent as a base64url-encoded single-kind `user` context in the
/// request path.
#[derive(Debug, Clone)]
pub struct LaunchDarklyClient {
    client: reqwest::Client,
    base_uri: String,
    client_side_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EvaluatedFlag {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    variation: Option<u64>,
}

impl LaunchDarklyClient {
    pub fn new(config: &LaunchDarklyConfig) -> LaunchDarklyClient {
        LaunchDarklyClient {
            client: reqwest::Client::new(),
            base_uri: config.base_uri.clone(),
            client_side_id: config.client_side_id.clone(),
        }
    }

    fn evaluation_url(&self, context: &EvaluationContext) -> Result<url::Url> {
        let client_side_id = self
            .client_side_id
            .as_deref()
            .ok_or_else(|| Error::VendorInit("LaunchDarkly client-side id is not set".to_owned()))?;
        join_url(
            &self.base_uri,
            &format!(
                "sdk/evalx/{client_side_id}/contexts/{}",
                encode_context(context)
            ),
        )
    }

    async fn evaluate(&self, url: url::Url) -> std::result::Result<FlagSnapshot, FetchError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let flags: HashMap<String, EvaluatedFlag> =
            serde_json::from_slice(&response.bytes().await?)?;

        Ok(flags
            .into_iter()
            .map(|(key, flag)| {
                (
                    key,
                    RemoteFlag {
                        value: flag.value,
                        enabled: None,
                        variant: flag.variation.map(|variation| variation.to_string()),
                    },
                )
            })
            .collect())
    }
}

/// Encode `context` as a LaunchDarkly user context.
fn encode_context(context: &EvaluationContext) -> String {
    let mut user = Map::new();
    user.insert("kind".to_owned(), Value::from("user"));
    user.insert("key".to_owned(), Value::from(context.identity()));
    for (name, value) in context.attributes() {
        if name == "kind" || name == "key" {
            continue;
        }
        if let Ok(value) = serde_json::to_value(value) {
            user.insert(name.clone(), value);
        }
    }
    URL_SAFE_NO_PAD.encode(Value::Object(user).to_string())
}

#[async_trait]
impl VendorClient for LaunchDarklyClient {
    async fn setup(&self) -> Result<()> {
        if self.client_side_id.is_none() {
            return Err(Error::VendorInit(
                "LaunchDarkly client-side id is not set".to_owned(),
            ));
        }
        Ok(())
    }

    async fn fetch_flags(&self, context: &EvaluationContext) -> Result<FlagSnapshot> {
        let url = self.evaluation_url(context)?;
        self.evaluate(url)
            .await
            .map_err(|source| Error::DocumentFetch {
                location: self.base_uri.clone(),
                source,
            })
    }
}
