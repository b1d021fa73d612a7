use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use flagswitch_core::{Error, EvaluationContext, FetchError, Result};

use super::{join_url, FlagSnapshot, RemoteFlag, VendorClient};
use crate::config::FlagdConfig;

const BULK_EVALUATION_PATH: &str = "ofrep/v1/evaluate/flags";

/// Client of flagd's OFREP bulk evaluation endpoint.
#[derive(Debug, Clone)]
pub struct FlagdClient {
    client: reqwest::Client,
    url: Url,
}

#[derive(Debug, Serialize)]
struct BulkEvaluationRequest<'a> {
    context: &'a EvaluationContext,
}

#[derive(Debug, Deserialize)]
struct BulkEvaluationResponse {
    #[serde(default)]
    flags: Vec<EvaluatedFlag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluatedFlag {
    key: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

impl FlagdClient {
    pub fn new(config: &FlagdConfig) -> Result<FlagdClient> {
        Ok(FlagdClient {
            client: reqwest::Client::new(),
            url: join_url(&config.base_url(), BULK_EVALUATION_PATH)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn evaluate(&self, context: &EvaluationContext) -> std::result::Result<FlagSnapshot, FetchError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&BulkEvaluationRequest { context })
            .send()
            .await?
            .error_for_status()?;
        let response: BulkEvaluationResponse = serde_json::from_slice(&response.bytes().await?)?;

        Ok(response
            .flags
            .into_iter()
            .filter_map(|flag| match flag.error_code {
                Some(code) => {
                    log::debug!(target: "flagswitch", key = flag.key, code; "flagd could not evaluate flag");
                    None
                }
                None => Some((
                    flag.key,
                    RemoteFlag {
                        value: flag.value,
                        enabled: None,
                        variant: flag.variant,
                    },
                )),
            })
            .collect())
    }
}

#[async_trait]
impl VendorClient for FlagdClient {
    async fn fetch_flags(&self, context: &EvaluationContext) -> Result<FlagSnapshot> {
        self.evaluate(context)
            .await
            .map_err(|source| Error::DocumentFetch {
                location: self.url.to_string(),
                source,
            })
    }
}
