//! Never-failing navigation over schema-less payload trees.
//!
//! Responses from the cluster tool are parsed into a [`Node`] tree. Reading
//! never fails: any lookup against an absent key, an out-of-range index, or a
//! node of the wrong shape yields [`Node::Missing`], which itself navigates to
//! `Missing`. `Missing` compares equal only to `Missing`, so an empty object,
//! an empty string or `null` are all distinct from "not there".
//!
//! ```
//! use kubeshim::Node;
//!
//! let pod = Node::from(serde_json::json!({"metadata": {"name": "web-0"}}));
//! assert_eq!(pod["metadata"]["name"].as_str(), Some("web-0"));
//! assert!(pod["spec"]["containers"][0]["image"].is_missing());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use tracing::debug;

use crate::core::path::{Path, Segment};

/// Most `null`s a single write pads onto the end of a sequence.
pub const MAX_SEQUENCE_PADDING: usize = 10_000;

/// Ordered object mapping. Key order is preserved from the parsed payload.
pub type Object = IndexMap<String, Node>;

/// A structured payload node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    /// No data at this position.
    #[default]
    Missing,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<Node>),
    Object(Object),
}

static MISSING: Node = Node::Missing;

impl Node {
    /// An empty object.
    pub fn object() -> Self {
        Node::Object(Object::new())
    }

    /// An empty sequence.
    pub fn sequence() -> Self {
        Node::Sequence(Vec::new())
    }

    /// Parse a JSON document.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Value>(bytes).map(Node::from)
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(text).map(Node::from)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Node::Missing)
    }

    pub fn exists(&self) -> bool {
        !self.is_missing()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Look up an object key.
    pub fn key(&self, key: &str) -> &Node {
        match self {
            Node::Object(map) => map.get(key).unwrap_or(&MISSING),
            _ => &MISSING,
        }
    }

    /// Look up a sequence element.
    pub fn item(&self, index: usize) -> &Node {
        match self {
            Node::Sequence(items) => items.get(index).unwrap_or(&MISSING),
            _ => &MISSING,
        }
    }

    pub fn child(&self, segment: &Segment) -> &Node {
        match segment {
            Segment::Key(key) => self.key(key),
            Segment::Index(index) => self.item(*index),
        }
    }

    /// Follow `path` from this node. Returns `Missing` if any step is absent.
    pub fn get(&self, path: &[Segment]) -> &Node {
        path.iter().fold(self, |node, segment| node.child(segment))
    }

    pub fn get_path(&self, path: &Path) -> &Node {
        self.get(path.segments())
    }

    /// Follow a dotted path such as `spec.containers[0].image`.
    ///
    /// A malformed path reads as `Missing`; use [`Path::parse`] to see the error.
    pub fn at(&self, dotted: &str) -> &Node {
        match Path::parse(dotted) {
            Ok(path) => self.get_path(&path),
            Err(err) => {
                debug!(%err, "unparseable path reads as missing");
                &MISSING
            }
        }
    }

    pub fn get_mut(&mut self, path: &[Segment]) -> Option<&mut Node> {
        let mut node = self;
        for segment in path {
            node = match (node, segment) {
                (Node::Object(map), Segment::Key(key)) => map.get_mut(key)?,
                (Node::Sequence(items), Segment::Index(index)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Write `value` at `path`, materializing intermediate containers.
    ///
    /// Key segments materialize objects and index segments materialize
    /// sequences (padded with `null`). Scalars in the way are replaced.
    /// Writing `Missing` removes the terminal instead.
    /// An index more than [`MAX_SEQUENCE_PADDING`] past the end of its
    /// sequence leaves the node untouched.
    pub fn set(&mut self, path: &[Segment], value: impl Into<Node>) -> &mut Self {
        let value = value.into();
        if value.is_missing() {
            self.remove(path);
            return self;
        }
        if let Some(index) = self.excess_padding(path) {
            debug!(index, "sequence index too far past the end; write ignored");
            return self;
        }
        *self.slot(path) = value;
        self
    }

    /// First index segment that would pad more than the allowed number of nulls.
    fn excess_padding(&self, path: &[Segment]) -> Option<usize> {
        let mut node = self;
        for segment in path {
            if let Segment::Index(index) = segment {
                let len = node.as_sequence().map_or(0, <[Node]>::len);
                if index.saturating_sub(len) > MAX_SEQUENCE_PADDING {
                    return Some(*index);
                }
            }
            node = node.child(segment);
        }
        None
    }

    /// [`Node::set`] with a dotted path. A malformed path leaves the node untouched.
    pub fn set_at(&mut self, dotted: &str, value: impl Into<Node>) -> &mut Self {
        match Path::parse(dotted) {
            Ok(path) => self.set(path.segments(), value),
            Err(err) => {
                debug!(%err, "unparseable path ignored on write");
                self
            }
        }
    }

    /// Remove and return the node at `path`, or `Missing` if nothing was there.
    pub fn remove(&mut self, path: &[Segment]) -> Node {
        let Some((last, parent_path)) = path.split_last() else {
            return std::mem::take(self);
        };
        let Some(parent) = self.get_mut(parent_path) else {
            return Node::Missing;
        };
        match (parent, last) {
            (Node::Object(map), Segment::Key(key)) => map.shift_remove(key).unwrap_or_default(),
            (Node::Sequence(items), Segment::Index(index)) if *index < items.len() => {
                items.remove(*index)
            }
            _ => Node::Missing,
        }
    }

    fn slot(&mut self, path: &[Segment]) -> &mut Node {
        let mut node = self;
        for segment in path {
            node = node.child_slot(segment);
        }
        node
    }

    fn child_slot(&mut self, segment: &Segment) -> &mut Node {
        match segment {
            Segment::Key(key) => {
                if !matches!(self, Node::Object(_)) {
                    *self = Node::object();
                }
                match self {
                    Node::Object(map) => map.entry(key.clone()).or_insert(Node::Null),
                    _ => unreachable!("slot was just materialized as an object"),
                }
            }
            Segment::Index(index) => {
                if !matches!(self, Node::Sequence(_)) {
                    *self = Node::sequence();
                }
                match self {
                    Node::Sequence(items) => {
                        if items.len() <= *index {
                            items.resize(index.saturating_add(1), Node::Null);
                        }
                        &mut items[*index]
                    }
                    _ => unreachable!("slot was just materialized as a sequence"),
                }
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Node::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Node::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Node::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Number of children for containers, zero for everything else.
    pub fn len(&self) -> usize {
        match self {
            Node::Object(map) => map.len(),
            Node::Sequence(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence elements; empty for non-sequences.
    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.as_sequence().unwrap_or_default().iter()
    }

    /// Object entries in payload order; empty for non-objects.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.as_object()
            .into_iter()
            .flat_map(|map| map.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// String-valued entries of an object, e.g. labels or annotations.
    pub fn string_map(&self) -> BTreeMap<String, String> {
        self.entries()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }

    /// Canonical exchange form. `Missing` entries are dropped; a missing root is `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Node::Missing | Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Sequence(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            Node::Object(map) => Value::Object(
                map.iter()
                    .filter(|(_, v)| v.exists())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Compact JSON text, key order preserved.
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn to_json_pretty(&self) -> String {
        format!("{:#}", self.to_json())
    }

    /// Independent deep copy; mutating it never affects `self`.
    pub fn snapshot(&self) -> Node {
        self.clone()
    }
}

impl Index<&str> for Node {
    type Output = Node;

    fn index(&self, key: &str) -> &Node {
        self.key(key)
    }
}

impl Index<usize> for Node {
    type Output = Node;

    fn index(&self, index: usize) -> &Node {
        self.item(index)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => {
                Node::Object(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Number(n.into())
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        Node::Number(n.into())
    }
}

impl From<u64> for Node {
    fn from(n: u64) -> Self {
        Node::Number(n.into())
    }
}

impl From<f64> for Node {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Node::Null, Node::Number)
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::Sequence(items)
    }
}

impl From<Object> for Node {
    fn from(map: Object) -> Self {
        Node::Object(map)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Node::from)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "{:#}", self.to_json())
        } else {
            write!(f, "{}", self.to_json())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    fn sample() -> Node {
        Node::from(json!({
            "kind": "Pod",
            "metadata": {
                "name": "web-0",
                "labels": {"app": "web"},
                "annotations": {"kubernetes.io/created-by": "ctrl"}
            },
            "spec": {"containers": [{"name": "main", "image": "nginx"}]},
            "status": {}
        }))
    }

    #[test]
    fn absent_paths_read_as_missing_at_any_depth() {
        let node = sample();
        assert!(node.get(&path!["metadata", "nope", "deeper", "still"]).is_missing());
        assert!(node["spec"]["containers"][5]["image"].is_missing());
        assert!(node["kind"]["not-an-object"].is_missing());
        assert!(node["metadata"][0].is_missing());
        assert!(Node::Missing["a"][1]["b"].is_missing());
    }

    #[test]
    fn present_paths_return_the_stored_node() {
        let node = sample();
        assert_eq!(node.at("spec.containers[0].image").as_str(), Some("nginx"));
        assert_eq!(
            node.at(r#"metadata.annotations["kubernetes.io/created-by"]"#)
                .as_str(),
            Some("ctrl")
        );
        assert_eq!(
            node.get(&path!["metadata", "annotations", "kubernetes.io/created-by"])
                .as_str(),
            Some("ctrl")
        );
    }

    #[test]
    fn malformed_dotted_path_reads_as_missing() {
        assert!(sample().at("metadata..name").is_missing());
    }

    #[test]
    fn missing_equals_only_missing() {
        assert_eq!(Node::Missing, Node::Missing);
        assert_ne!(Node::Missing, Node::Null);
        assert_ne!(Node::Missing, Node::object());
        assert_ne!(Node::Missing, Node::sequence());
        assert_ne!(Node::Missing, Node::from(""));
        assert_ne!(sample()["status"], Node::Missing);
    }

    #[test]
    fn set_then_get_round_trips_through_new_intermediates() {
        let mut node = sample();
        let path = path!["metadata", "labels", "tier"];
        assert_eq!(node.set(&path, "frontend").get(&path), &Node::from("frontend"));

        let deep = path!["spec", "volumes", 2usize, "configMap", "name"];
        assert_eq!(node.set(&deep, "cfg").get(&deep).as_str(), Some("cfg"));
        assert!(node.at("spec.volumes[0]").is_null());
        assert_eq!(node.at("spec.volumes").len(), 3);
    }

    #[test]
    fn set_on_missing_root_materializes_the_path() {
        let mut node = Node::Missing;
        node.set_at("a.b[1].c", 7);
        assert_eq!(node.at("a.b[1].c").as_i64(), Some(7));
        assert_eq!(node.to_json(), json!({"a": {"b": [null, {"c": 7}]}}));
    }

    #[test]
    fn set_replaces_scalars_in_the_way() {
        let mut node = sample();
        node.set(&path!["kind", "nested"], true);
        assert_eq!(node["kind"]["nested"].as_bool(), Some(true));
    }

    #[test]
    fn setting_missing_removes_the_terminal() {
        let mut node = sample();
        node.set(&path!["metadata", "labels", "app"], Node::Missing);
        assert!(node["metadata"]["labels"]["app"].is_missing());
        assert!(node["metadata"]["labels"].exists());
    }

    #[test]
    fn remove_returns_previous_value() {
        let mut node = sample();
        let removed = node.remove(&path!["spec", "containers", 0usize]);
        assert_eq!(removed["name"].as_str(), Some("main"));
        assert!(node["spec"]["containers"].is_empty());
        assert!(node.remove(&path!["nope", "x"]).is_missing());
    }

    #[test]
    fn snapshot_is_independent_of_the_original() {
        let original = sample();
        let mut copy = original.snapshot();
        copy.set_at("metadata.name", "changed");
        copy.remove(&path!["spec"]);
        assert_eq!(original.at("metadata.name").as_str(), Some("web-0"));
        assert_eq!(original.at("spec.containers[0].name").as_str(), Some("main"));
    }

    #[test]
    fn json_export_preserves_key_order() {
        let node = Node::from_json_str(r#"{"z":1,"a":{"y":true,"b":null}}"#).expect("parse");
        assert_eq!(node.to_json_string(), r#"{"z":1,"a":{"y":true,"b":null}}"#);
    }

    #[test]
    fn serde_round_trip_through_typed_json() {
        let node = sample();
        let text = serde_json::to_string(&node).expect("serialize");
        let back: Node = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, node);
    }

    #[test]
    fn string_map_skips_non_string_values() {
        let node = Node::from(json!({"a": "1", "b": 2, "c": "3"}));
        let map = node.string_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("c").map(String::as_str), Some("3"));
    }

    #[test]
    fn huge_index_writes_are_ignored() {
        let mut node = Node::Missing;
        node.set_at("a[18446744073709551615]", 1);
        assert!(node.is_missing());

        let mut node = sample();
        let before = node.clone();
        node.set_at("spec.containers[4000000000]", "x");
        assert_eq!(node, before);
    }

    #[test]
    fn padding_is_bounded_relative_to_length() {
        let mut node = Node::Missing;
        node.set_at(&format!("items[{MAX_SEQUENCE_PADDING}]"), true);
        assert_eq!(node.at("items").len(), MAX_SEQUENCE_PADDING + 1);
        assert!(node.at("items[0]").is_null());

        let far = 2 * MAX_SEQUENCE_PADDING + 1;
        node.set_at(&format!("items[{far}]"), true);
        assert_eq!(node.at(&format!("items[{far}]")).as_bool(), Some(true));
    }
}
