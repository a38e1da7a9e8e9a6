//! Label and field matchers and their command-line rendering.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::model::Node;

/// A single label predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelPredicate {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl LabelPredicate {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            LabelPredicate::Equals(k, v) => labels.get(k) == Some(v),
            LabelPredicate::NotEquals(k, v) => labels.get(k) != Some(v),
            LabelPredicate::Exists(k) => labels.contains_key(k),
            LabelPredicate::NotExists(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for LabelPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelPredicate::Equals(k, v) => write!(f, "{k}={v}"),
            LabelPredicate::NotEquals(k, v) => write!(f, "{k}!={v}"),
            LabelPredicate::Exists(k) => f.write_str(k),
            LabelPredicate::NotExists(k) => write!(f, "!{k}"),
        }
    }
}

/// Conjunction of label predicates, rendered as the `-l` argument.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelMatcher(Vec<LabelPredicate>);

impl LabelMatcher {
    pub fn push(&mut self, predicate: LabelPredicate) {
        self.0.push(predicate);
    }

    pub fn predicates(&self) -> &[LabelPredicate] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `app=web,tier!=db,canary,!legacy`. Also accepts `==`.
    pub fn parse(input: &str) -> Self {
        let predicates = input
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| {
                if let Some((k, v)) = term.split_once("!=") {
                    LabelPredicate::NotEquals(k.trim().to_string(), v.trim().to_string())
                } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('='))
                {
                    LabelPredicate::Equals(k.trim().to_string(), v.trim().to_string())
                } else if let Some(k) = term.strip_prefix('!') {
                    LabelPredicate::NotExists(k.trim().to_string())
                } else {
                    LabelPredicate::Exists(term.to_string())
                }
            })
            .collect();
        Self(predicates)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|p| p.matches(labels))
    }

    /// The `-l` value, or `None` when the matcher is empty.
    pub fn render(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// A single field predicate (`metadata.name=x`, `status.phase!=Running`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPredicate {
    pub field: String,
    pub value: String,
    pub negated: bool,
}

/// Conjunction of field predicates, rendered as `--field-selector`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMatcher(Vec<FieldPredicate>);

impl FieldMatcher {
    pub fn push(&mut self, predicate: FieldPredicate) {
        self.0.push(predicate);
    }

    pub fn predicates(&self) -> &[FieldPredicate] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parse(input: &str) -> Self {
        let predicates = input
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .filter_map(|term| {
                if let Some((field, value)) = term.split_once("!=") {
                    Some(FieldPredicate {
                        field: field.to_string(),
                        value: value.to_string(),
                        negated: true,
                    })
                } else {
                    let (field, value) = term.split_once("==").or_else(|| term.split_once('='))?;
                    Some(FieldPredicate {
                        field: field.to_string(),
                        value: value.to_string(),
                        negated: false,
                    })
                }
            })
            .collect();
        Self(predicates)
    }

    /// Evaluate against an object. Absent fields compare as the empty string.
    pub fn matches(&self, object: &Node) -> bool {
        self.0.iter().all(|p| {
            let actual = field_text(object.at(&p.field));
            (actual == p.value) != p.negated
        })
    }

    pub fn render(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(|p| {
                    let op = if p.negated { "!=" } else { "=" };
                    format!("{}{op}{}", p.field, p.value)
                })
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

fn field_text(node: &Node) -> String {
    match node {
        Node::String(s) => s.clone(),
        Node::Missing | Node::Null => String::new(),
        other => other.to_json_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_and_render_round_trip() {
        let matcher = LabelMatcher::parse("app=web, tier!=db,canary,!legacy");
        assert_eq!(
            matcher.render().as_deref(),
            Some("app=web,tier!=db,canary,!legacy")
        );
    }

    #[test]
    fn empty_matcher_renders_nothing_and_matches_everything() {
        let matcher = LabelMatcher::default();
        assert_eq!(matcher.render(), None);
        assert!(matcher.matches(&labels(&[])));
    }

    #[test]
    fn label_predicates_are_conjunctive() {
        let matcher = LabelMatcher::parse("app=web,!legacy");
        assert!(matcher.matches(&labels(&[("app", "web")])));
        assert!(!matcher.matches(&labels(&[("app", "web"), ("legacy", "1")])));
        assert!(!matcher.matches(&labels(&[("app", "db")])));
    }

    #[test]
    fn field_matcher_reads_dotted_paths() {
        let obj = Node::from(json!({"metadata": {"name": "a"}, "status": {"phase": "Running"}}));
        assert!(FieldMatcher::parse("metadata.name=a").matches(&obj));
        assert!(FieldMatcher::parse("status.phase!=Pending").matches(&obj));
        assert!(!FieldMatcher::parse("metadata.namespace=x").matches(&obj));
        assert!(FieldMatcher::parse("metadata.namespace=").matches(&obj));
    }
}
