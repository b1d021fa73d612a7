use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EvaluationContext, FetchError, Resolved, RuleDocument};

/// A LaunchDarkly flag data file, as used by the SDKs' file data source.
///
/// Supports the `flagValues` section (flag key → fixed value) and a simplified `flags` section
/// where each flag is evaluated from its `on` state, individual `targets` and the fallthrough
/// variation. Rules, rollouts and prerequisites are not evaluated. A key present in both sections
/// resolves from `flags`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDarklyFlagFile {
    #[serde(default)]
    pub flags: HashMap<String, LaunchDarklyFlag>,
    #[serde(default)]
    pub flag_values: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDarklyFlag {
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub variations: Vec<Value>,
    #[serde(default)]
    pub off_variation: Option<usize>,
    #[serde(default)]
    pub targets: Vec<LaunchDarklyTarget>,
    #[serde(default)]
    pub fallthrough: Fallthrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchDarklyTarget {
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: usize,
}

/// Fallthrough of a flag. Rollouts are not supported and yield no value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fallthrough {
    #[serde(default)]
    pub variation: Option<usize>,
}

impl LaunchDarklyFlag {
    /// Index of the variation served to `context`.
    pub fn variation_index(&self, context: &EvaluationContext) -> Option<usize> {
        if !self.on {
            return self.off_variation;
        }
        if let Some(key) = context.targeting_key() {
            let targeted = self
                .targets
                .iter()
                .find(|target| target.values.iter().any(|v| v == key));
            if let Some(target) = targeted {
                return Some(target.variation);
            }
        }
        self.fallthrough.variation
    }

    pub fn evaluate(&self, context: &EvaluationContext) -> Option<&Value> {
        let index = self.variation_index(context)?;
        let value = self.variations.get(index);
        if value.is_none() {
            log::warn!(target: "flagswitch", index; "LaunchDarkly flag refers to a missing variation");
        }
        value
    }
}

impl RuleDocument for LaunchDarklyFlagFile {
    const FORMAT: &'static str = "launchdarkly-flag-file";

    fn from_slice(bytes: &[u8]) -> Result<Self, FetchError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn resolve<'a>(&'a self, key: &str, context: &EvaluationContext) -> Option<Resolved<'a>> {
        let value = match self.flags.get(key) {
            Some(flag) => flag.evaluate(context),
            None => self.flag_values.get(key),
        };
        value.map(Resolved::Value)
    }

    fn flag_keys(&self) -> Vec<String> {
        self.flags
            .keys()
            .chain(self.flag_values.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
