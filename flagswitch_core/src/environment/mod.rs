//! Environment documents and their offline evaluation.
//!
//! [`Environment`] indexes an [`EnvironmentDocument`] once at load time so that each flag lookup
//! only touches the states of the requested feature.
mod models;
mod segments;

use std::collections::{HashMap, HashSet};

pub use models::*;

use crate::{EvaluationContext, FetchError, Resolved, RuleDocument};

/// An indexed, immutable environment document.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    document: EnvironmentDocument,
    /// Feature name → feature id.
    feature_ids: HashMap<String, i64>,
    /// Feature id → indices into `document.feature_states`, in document order.
    states_by_feature: HashMap<i64, Vec<usize>>,
}

impl Environment {
    /// Index a parsed document.
    ///
    /// Duplicate feature names are a misconfiguration: the first feature with a given name wins
    /// and the others are ignored.
    pub fn from_document(document: EnvironmentDocument) -> Environment {
        let mut feature_ids = HashMap::with_capacity(document.features.len());
        for feature in &document.features {
            if feature_ids.contains_key(&feature.name) {
                log::warn!(target: "flagswitch", feature = feature.name.as_str(); "duplicate feature name in environment document, keeping the first one");
                continue;
            }
            feature_ids.insert(feature.name.clone(), feature.id);
        }

        let mut states_by_feature: HashMap<i64, Vec<usize>> = HashMap::new();
        for (index, state) in document.feature_states.iter().enumerate() {
            states_by_feature
                .entry(state.feature_id)
                .or_default()
                .push(index);
        }

        let unsupported_segments = document
            .segments
            .iter()
            .filter(|segment| {
                segment.rules.iter().any(|rule| {
                    rule.rule_type == RuleType::All
                        && rule
                            .conditions
                            .iter()
                            .any(|condition| condition.operator == ConditionOperator::Unsupported)
                })
            })
            .count();
        if unsupported_segments > 0 {
            log::warn!(target: "flagswitch", unsupported_segments; "environment document uses unsupported condition operators, affected segments will never match");
        }

        Environment {
            document,
            feature_ids,
            states_by_feature,
        }
    }

    /// The underlying document.
    pub fn document(&self) -> &EnvironmentDocument {
        &self.document
    }

    /// Ids of all segments that match `context`.
    pub fn matching_segment_ids(&self, context: &EvaluationContext) -> HashSet<i64> {
        self.document
            .segments
            .iter()
            .filter(|segment| segment.matches(context))
            .map(|segment| segment.id)
            .collect()
    }

    /// Pick the winning state of `feature_name` for `context`.
    ///
    /// The first state (in document order) whose segment matches wins. Otherwise, the first
    /// default state wins. Returns `None` for unknown features and for features without any
    /// applicable state.
    pub fn resolve_state(
        &self,
        feature_name: &str,
        context: &EvaluationContext,
    ) -> Option<&FeatureState> {
        let feature_id = self.feature_ids.get(feature_name)?;
        let indices = self.states_by_feature.get(feature_id)?;
        let feature_states = &self.document.feature_states;
        let states = move || indices.iter().map(move |&i| &feature_states[i]);

        // Segments are only evaluated when the feature has overrides.
        if states().any(|state| state.segment_id.is_some()) {
            let matched = self.matching_segment_ids(context);
            let scoped = states().find(|state| {
                state
                    .segment_id
                    .is_some_and(|segment_id| matched.contains(&segment_id))
            });
            if scoped.is_some() {
                return scoped;
            }
        }

        states().find(|state| state.segment_id.is_none())
    }

    /// Names of all features, in document order.
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.document.features.iter().map(|f| f.name.as_str())
    }
}

impl From<EnvironmentDocument> for Environment {
    fn from(value: EnvironmentDocument) -> Self {
        Environment::from_document(value)
    }
}

impl RuleDocument for Environment {
    const FORMAT: &'static str = "flagsmith-environment";

    fn from_slice(bytes: &[u8]) -> Result<Self, FetchError> {
        let document: EnvironmentDocument = serde_json::from_slice(bytes)?;
        Ok(Environment::from_document(document))
    }

    fn resolve<'a>(&'a self, key: &str, context: &EvaluationContext) -> Option<Resolved<'a>> {
        self.resolve_state(key, context).map(Resolved::State)
    }

    fn flag_keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.feature_names()
            .filter(|name| seen.insert(*name))
            .map(str::to_owned)
            .collect()
    }
}
