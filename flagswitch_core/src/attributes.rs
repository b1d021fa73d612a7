use std::{borrow::Cow, collections::HashMap};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::value::format_number;

/// Identity used when a caller does not supply one.
pub const ANONYMOUS: &str = "anonymous";

/// Name under which the targeting key can be referenced from segment conditions.
const TARGETING_KEY: &str = "targetingKey";

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// # Examples
/// ```
/// # use flagswitch_core::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("userId".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of an evaluation context attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl AttributeValue {
    /// Return the string if this is a string attribute.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Render the attribute for equality comparison against condition values.
    pub fn to_comparable_string(&self) -> Cow<'_, str> {
        match self {
            AttributeValue::String(s) => Cow::Borrowed(s),
            AttributeValue::Number(n) => Cow::Owned(format_number(*n)),
            AttributeValue::Boolean(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            AttributeValue::Null => Cow::Borrowed("null"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Caller-supplied attributes used to match segments and identify the caller to remote vendors.
///
/// A context can be set as ambient state on a provider or passed to every flag read. A context
/// passed to a read always wins over the ambient one.
///
/// # Examples
/// ```
/// # use flagswitch_core::EvaluationContext;
/// let context = EvaluationContext::for_user("pradyun").with_attribute("plan", "pro");
/// assert_eq!(context.targeting_key(), Some("pradyun"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targeting_key: Option<String>,
    #[serde(flatten)]
    attributes: Attributes,
}

impl EvaluationContext {
    /// Create an empty context.
    pub fn new() -> EvaluationContext {
        EvaluationContext::default()
    }

    /// Create a context for a user. Sets both the targeting key and a `userId` attribute. An empty
    /// id is replaced with [`ANONYMOUS`].
    pub fn for_user(user_id: impl Into<String>) -> EvaluationContext {
        let mut user_id = user_id.into();
        if user_id.trim().is_empty() {
            user_id = ANONYMOUS.to_owned();
        }
        EvaluationContext::new()
            .with_attribute("userId", user_id.as_str())
            .with_targeting_key(user_id)
    }

    /// Set the targeting key.
    pub fn with_targeting_key(mut self, targeting_key: impl Into<String>) -> EvaluationContext {
        self.targeting_key = Some(targeting_key.into());
        self
    }

    /// Set an attribute.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> EvaluationContext {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Targeting key, falling back to the `userId` attribute.
    pub fn targeting_key(&self) -> Option<&str> {
        self.targeting_key
            .as_deref()
            .or_else(|| self.attributes.get("userId").and_then(AttributeValue::as_str))
    }

    /// Stable identity of the caller. Used to key per-identity state of remote vendors.
    pub fn identity(&self) -> &str {
        self.targeting_key().unwrap_or(ANONYMOUS)
    }

    /// All attributes, excluding the targeting key.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Look up an attribute by name.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Look up an attribute by name and render it for equality comparison. `targetingKey` refers
    /// to the targeting key unless an attribute with that name exists.
    pub fn get_comparable(&self, name: &str) -> Option<Cow<'_, str>> {
        match self.attributes.get(name) {
            Some(value) => Some(value.to_comparable_string()),
            None if name == TARGETING_KEY => self.targeting_key.as_deref().map(Cow::Borrowed),
            None => None,
        }
    }
}
