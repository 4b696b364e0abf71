use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
}

/// A node in a filter tree: either a nested group or a single
/// `{field, operator, value}` comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group(FilterGroup),
    Condition(FilterCondition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterGroup {
    pub conjunction: Conjunction,
    #[serde(default)]
    pub conditions: Vec<FilterNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

/// Evaluates a filter tree against a record snapshot. Evaluation is
/// left-to-right and short-circuits; an empty group is vacuously true.
pub fn evaluate(group: &FilterGroup, record: &Value) -> bool {
    match group.conjunction {
        Conjunction::And => group.conditions.iter().all(|node| evaluate_node(node, record)),
        Conjunction::Or => {
            if group.conditions.is_empty() {
                return true;
            }
            group.conditions.iter().any(|node| evaluate_node(node, record))
        }
    }
}

fn evaluate_node(node: &FilterNode, record: &Value) -> bool {
    match node {
        FilterNode::Group(group) => evaluate(group, record),
        FilterNode::Condition(cond) => evaluate_condition(cond, record),
    }
}

fn evaluate_condition(cond: &FilterCondition, record: &Value) -> bool {
    let actual = record.get(&cond.field).cloned().unwrap_or(Value::Null);
    match cond.operator {
        FilterOperator::Eq => values_equal(&actual, &cond.value),
        FilterOperator::Neq => !values_equal(&actual, &cond.value),
        // Numeric comparisons fail closed when either side is non-numeric.
        FilterOperator::Gt => compare_numeric(&actual, &cond.value, |a, b| a > b),
        FilterOperator::Gte => compare_numeric(&actual, &cond.value, |a, b| a >= b),
        FilterOperator::Lt => compare_numeric(&actual, &cond.value, |a, b| a < b),
        FilterOperator::Lte => compare_numeric(&actual, &cond.value, |a, b| a <= b),
        FilterOperator::Contains => string_pair(&actual, &cond.value)
            .map(|(a, b)| a.contains(&b))
            .unwrap_or(false),
        FilterOperator::NotContains => string_pair(&actual, &cond.value)
            .map(|(a, b)| !a.contains(&b))
            .unwrap_or(false),
        FilterOperator::StartsWith => string_pair(&actual, &cond.value)
            .map(|(a, b)| a.starts_with(&b))
            .unwrap_or(false),
        FilterOperator::EndsWith => string_pair(&actual, &cond.value)
            .map(|(a, b)| a.ends_with(&b))
            .unwrap_or(false),
        FilterOperator::IsEmpty => is_empty(&actual),
        FilterOperator::IsNotEmpty => !is_empty(&actual),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => {
            if left == right {
                return true;
            }
            match (value_as_string(left), value_as_string(right)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
    }
}

fn compare_numeric(left: &Value, right: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (value_as_f64(left), value_as_f64(right)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn string_pair(left: &Value, right: &Value) -> Option<(String, String)> {
    Some((value_as_string(left)?, value_as_string(right)?))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(|v| v.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
