use crate::{
    environment::{Condition, ConditionOperator, RuleType, Segment, SegmentRule},
    value::to_display_string,
    EvaluationContext,
};

impl Segment {
    /// Check whether `context` belongs to the segment. A segment without rules matches every
    /// context.
    pub fn matches(&self, context: &EvaluationContext) -> bool {
        self.rules.iter().all(|rule| rule.matches(context))
    }
}

impl SegmentRule {
    pub(crate) fn matches(&self, context: &EvaluationContext) -> bool {
        match self.rule_type {
            RuleType::All => self
                .conditions
                .iter()
                .all(|condition| condition.matches(context)),
            RuleType::Unsupported => true,
        }
    }
}

impl Condition {
    fn matches(&self, context: &EvaluationContext) -> bool {
        self.operator.eval(context, &self.property, &self.value)
    }
}

impl ConditionOperator {
    /// Apply the operator. Returns `false` if the operator cannot be applied.
    fn eval(
        &self,
        context: &EvaluationContext,
        property: &str,
        condition_value: &serde_json::Value,
    ) -> bool {
        self.try_eval(context, property, condition_value)
            .unwrap_or(false)
    }

    /// Try applying the operator, returning `None` if it cannot be applied.
    fn try_eval(
        &self,
        context: &EvaluationContext,
        property: &str,
        condition_value: &serde_json::Value,
    ) -> Option<bool> {
        match self {
            Self::Equal => {
                let attribute = context.get_comparable(property)?;
                Some(attribute == to_display_string(condition_value))
            }
            Self::Unsupported => None,
        }
    }
}
