use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Environment document as authored in the flag service and downloaded for offline evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDocument {
    /// Optional document version. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<DocumentVersion>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// Ordered feature states. Order is significant: it breaks ties between matching segments.
    #[serde(default)]
    pub feature_states: Vec<FeatureState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentVersion {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub name: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: FeatureKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeatureKind {
    #[default]
    Flag,
    Config,
    /// Any kind this version does not know about. Treated like a flag.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleType {
    All,
    /// Rule types this version cannot evaluate. Such rules never block a segment from matching.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub property: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionOperator {
    Equal,
    /// Operators this version cannot evaluate. A condition using one is never satisfied.
    #[serde(other)]
    Unsupported,
}

/// A candidate value for a feature. A state without `segment_id` is the feature's default state;
/// the others override it for contexts matching their segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    pub feature_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub segment_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_document() {
        let document: EnvironmentDocument = serde_json::from_str(
            r#"{
              "version": 3,
              "features": [{"id": 1, "name": "new-badge", "type": "FLAG"}],
              "segments": [{
                "id": 10,
                "name": "pradyun",
                "rules": [{"type": "ALL", "conditions": [
                  {"operator": "EQUAL", "property": "userId", "value": "pradyun"},
                  {"operator": "REGEX", "property": "email", "value": ".*"}
                ]}, {"type": "ANY", "conditions": []}]
              }],
              "feature_states": [
                {"feature_id": 1, "enabled": false, "value": false, "segment_id": null},
                {"feature_id": 1, "enabled": true, "value": true, "segment_id": 10}
              ]
            }"#,
        )
        .unwrap();

        assert_eq!(document.version, Some(DocumentVersion::Number(3)));
        assert_eq!(document.features[0].kind, FeatureKind::Flag);
        let rules = &document.segments[0].rules;
        assert_eq!(rules[0].conditions[1].operator, ConditionOperator::Unsupported);
        assert_eq!(rules[1].rule_type, RuleType::Unsupported);
        assert_eq!(document.feature_states[1].segment_id, Some(10));
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let document: EnvironmentDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(document, EnvironmentDocument::default());
    }

    #[test]
    fn null_value_is_missing() {
        let state: FeatureState =
            serde_json::from_str(r#"{"feature_id": 2, "value": null}"#).unwrap();
        assert_eq!(state.value, None);
        assert_eq!(state.enabled, None);
        assert_eq!(state.segment_id, None);
    }
}
