//! Client of the backend flag mirror, which reports the flags the backend evaluated for a user.
//!
//! Comparing the mirror with local evaluation shows whether frontend and backend agree on the
//! active provider and its flags.
use std::collections::HashMap;

use serde_json::Value;
use url::Url;

use flagswitch_core::{Error, FetchError, Result};

#[derive(Debug, Clone)]
pub struct BackendMirror {
    client: reqwest::Client,
    url: Url,
}

/// Flags reported by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirroredFlags {
    /// Values by flag key. Only known keys are kept.
    pub flags: HashMap<String, Value>,
    /// Provider the backend evaluated with, if it said so.
    pub provider: Option<String>,
}

impl MirroredFlags {
    /// Pick the values of `known_keys` out of a mirror response.
    ///
    /// A key is looked up as is, then in camelCase (`new-badge` → `newBadge`).
    pub fn from_json(
        value: Value,
        known_keys: &[String],
    ) -> std::result::Result<MirroredFlags, FetchError> {
        let Value::Object(mut object) = value else {
            return Err(FetchError::UnexpectedShape("flag mirror response is not an object"));
        };

        let flags = known_keys
            .iter()
            .filter_map(|key| {
                object
                    .remove(key.as_str())
                    .or_else(|| object.remove(&camel_case(key)))
                    .map(|value| (key.clone(), value))
            })
            .collect();
        let provider = object
            .get("provider")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Ok(MirroredFlags { flags, provider })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.flags.get(key)
    }
}

fn camel_case(key: &str) -> String {
    let mut result = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '-' || c == '_' {
            upper = true;
        } else if upper {
            result.extend(c.to_uppercase());
            upper = false;
        } else {
            result.push(c);
        }
    }
    result
}

impl BackendMirror {
    /// `base` is the API root, e.g. `http://localhost:8000/api`.
    pub fn new(base: &str) -> Result<BackendMirror> {
        Ok(BackendMirror {
            client: reqwest::Client::new(),
            url: crate::provider::remote::join_url(base, "flags")?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Ask the backend for the flags of `user_id` under `provider_id`.
    pub async fn fetch(
        &self,
        user_id: &str,
        provider_id: &str,
        known_keys: &[String],
    ) -> Result<MirroredFlags> {
        self.fetch_json(user_id, provider_id)
            .await
            .and_then(|value| MirroredFlags::from_json(value, known_keys))
            .map_err(Error::Mirror)
    }

    async fn fetch_json(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> std::result::Result<Value, FetchError> {
        log::debug!(target: "flagswitch", user_id, provider_id; "querying backend flag mirror");
        let response = self
            .client
            .get(self.url.clone())
            .query(&[("userId", user_id), ("provider", provider_id)])
            .send()
            .await?
            .error_for_status()?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn filters_onto_known_keys() {
        let flags = MirroredFlags::from_json(
            json!({
                "newBadge": true,
                "cta-color": "green",
                "apiNewEndpointEnabled": false,
                "provider": "flagsmith-offline"
            }),
            &keys(&["new-badge", "cta-color", "max-items"]),
        )
        .unwrap();

        assert_eq!(flags.flags.len(), 2);
        assert_eq!(flags.get("new-badge"), Some(&json!(true)));
        assert_eq!(flags.get("cta-color"), Some(&json!("green")));
        assert_eq!(flags.get("max-items"), None);
        assert_eq!(flags.provider.as_deref(), Some("flagsmith-offline"));
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            MirroredFlags::from_json(json!([true]), &keys(&["new-badge"])),
            Err(FetchError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn camel_cases_keys() {
        assert_eq!(camel_case("api-new-endpoint-enabled"), "apiNewEndpointEnabled");
        assert_eq!(camel_case("plain"), "plain");
    }

    #[tokio::test]
    async fn fetches_flags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/flags"))
            .and(query_param("userId", "pradyun"))
            .and(query_param("provider", "growthbook"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"newBadge": true, "provider": "growthbook"})),
            )
            .mount(&server)
            .await;

        let mirror = BackendMirror::new(&format!("{}/api", server.uri())).unwrap();
        let flags = mirror
            .fetch("pradyun", "growthbook", &keys(&["new-badge"]))
            .await
            .unwrap();
        assert_eq!(flags.get("new-badge"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mirror = BackendMirror::new(&server.uri()).unwrap();
        assert!(matches!(
            mirror.fetch("pradyun", "growthbook", &[]).await,
            Err(Error::Mirror(FetchError::Status(_)))
        ));
    }
}
