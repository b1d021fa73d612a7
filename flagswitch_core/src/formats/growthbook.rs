use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{value::to_display_string, EvaluationContext, FetchError, Resolved, RuleDocument};

/// A GrowthBook features document, keyed by feature key.
///
/// Both the bare map and the API response shape (`{"features": {...}}`) are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GrowthBookFeatures {
    pub features: HashMap<String, GrowthBookFeature>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthBookFeature {
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub rules: Vec<GrowthBookRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthBookRule {
    /// Attribute name → expected value. Every entry must equal the context attribute.
    #[serde(default)]
    pub condition: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub force: Option<Value>,
}

impl GrowthBookRule {
    fn matches(&self, context: &EvaluationContext) -> bool {
        self.condition.iter().flatten().all(|(attribute, expected)| {
            context
                .get_comparable(attribute)
                .is_some_and(|actual| actual == to_display_string(expected))
        })
    }
}

impl GrowthBookFeature {
    /// Value of the first matching rule, falling back to the feature's default value.
    pub fn evaluate(&self, context: &EvaluationContext) -> Option<&Value> {
        match self.rules.iter().find(|rule| rule.matches(context)) {
            Some(GrowthBookRule {
                force: Some(force), ..
            }) => Some(force),
            _ => self.default_value.as_ref(),
        }
    }
}

impl<'de> Deserialize<'de> for GrowthBookFeatures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Wrapped {
                features: HashMap<String, GrowthBookFeature>,
            },
            Bare(HashMap<String, GrowthBookFeature>),
        }

        let features = match Shape::deserialize(deserializer)? {
            Shape::Wrapped { features } => features,
            Shape::Bare(features) => features,
        };
        Ok(GrowthBookFeatures { features })
    }
}

impl RuleDocument for GrowthBookFeatures {
    const FORMAT: &'static str = "growthbook-features";

    fn from_slice(bytes: &[u8]) -> Result<Self, FetchError> {
        let value: Value = serde_json::from_slice(bytes)?;
        if !value.is_object() {
            return Err(FetchError::UnexpectedShape(
                "GrowthBook features must be a JSON object",
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    fn resolve<'a>(&'a self, key: &str, context: &EvaluationContext) -> Option<Resolved<'a>> {
        self.features
            .get(key)?
            .evaluate(context)
            .map(Resolved::Value)
    }

    fn flag_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.features.keys().cloned().collect();
        keys.sort();
        keys
    }
}
