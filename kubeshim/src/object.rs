//! A single cluster resource backed by a [`Node`] tree.

use std::collections::BTreeMap;

use crate::apply::{self, ApplyOutcome};
use crate::client::{Client, with_namespace};
use crate::core::kind::{ResourceRef, normalize_kind};
use crate::core::model::Node;
use crate::error::{Error, Result};
use crate::io::runner::CommandRequest;
use crate::path;
use crate::selector::Selector;

/// One resource's full structured representation.
///
/// Identity accessors read fixed paths (`kind`, `apiVersion`, `metadata.*`).
/// The object is a snapshot: it goes stale as soon as the server-side copy
/// changes, which is only noticed when a submission conflicts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiObject {
    root: Node,
}

impl ApiObject {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Node::from_json_str(text)
            .map(Self::new)
            .map_err(|source| Error::Parse {
                what: "object json".to_string(),
                source,
            })
    }

    pub fn model(&self) -> &Node {
        &self.root
    }

    pub fn model_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    pub fn into_model(self) -> Node {
        self.root
    }

    /// `kind` as reported (`Deployment`).
    pub fn kind(&self) -> Option<&str> {
        self.root["kind"].as_str()
    }

    pub fn api_version(&self) -> Option<&str> {
        self.root["apiVersion"].as_str()
    }

    pub fn name(&self) -> Option<&str> {
        self.root["metadata"]["name"].as_str()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.root["metadata"]["namespace"].as_str()
    }

    pub fn uid(&self) -> Option<&str> {
        self.root["metadata"]["uid"].as_str()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.root["metadata"]["resourceVersion"].as_str()
    }

    /// Lowercased kind with the API group, as `-o name` reports it
    /// (`deployment.apps`, `pod`).
    pub fn qualified_kind(&self) -> String {
        let kind = self.kind().unwrap_or_default().to_ascii_lowercase();
        match self.api_version().and_then(|v| v.split_once('/')) {
            Some((group, _)) if !group.is_empty() => format!("{kind}.{group}"),
            _ => kind,
        }
    }

    /// `kind/name`, matching the tool's `-o name` output.
    pub fn qname(&self) -> String {
        format!("{}/{}", self.qualified_kind(), self.name().unwrap_or_default())
    }

    /// Reference used to re-fetch this object. Fails when kind or name is absent.
    pub fn resource_ref(&self) -> Result<ResourceRef> {
        Ok(ResourceRef::parse(&self.qname())?)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.root["metadata"]["labels"].string_map()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.root["metadata"]["labels"][key].as_str()
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.root["metadata"]["annotations"].string_map()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.root["metadata"]["annotations"][key].as_str()
    }

    /// Set (or with `None`, remove) a label on the local copy only.
    pub fn set_label(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        let node = value.map_or(Node::Missing, Node::from);
        self.root.set(&path!["metadata", "labels", key], node);
        self
    }

    /// Set (or with `None`, remove) an annotation on the local copy only.
    pub fn set_annotation(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        let node = value.map_or(Node::Missing, Node::from);
        self.root.set(&path!["metadata", "annotations", key], node);
        self
    }

    /// True if `kind` (alias, plural or `kind.group`) names this object's kind.
    pub fn is_kind(&self, kind: &str) -> bool {
        let wanted = normalize_kind(kind);
        let own = self.kind().map(normalize_kind).unwrap_or_default();
        !own.is_empty() && (wanted == own || wanted == self.qualified_kind())
    }

    /// A `*List` payload with an `items` sequence.
    pub fn is_list(&self) -> bool {
        self.kind().is_some_and(|k| k.ends_with("List")) && self.root["items"].as_sequence().is_some()
    }

    /// List items, or this object alone.
    pub fn elements(&self) -> Vec<ApiObject> {
        if self.is_list() {
            self.root["items"].iter().cloned().map(ApiObject::new).collect()
        } else {
            vec![self.clone()]
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.root.to_json()
    }

    pub fn to_json_string(&self) -> String {
        self.root.to_json_string()
    }

    /// Independent deep copy.
    pub fn snapshot(&self) -> ApiObject {
        Self::new(self.root.snapshot())
    }

    /// Replace the local copy with the current server state.
    pub fn refresh(&mut self, client: &Client) -> Result<()> {
        *self = client.get_in(&self.resource_ref()?, self.namespace())?;
        Ok(())
    }

    pub fn create(&mut self, client: &Client) -> Result<()> {
        *self = client.create(self)?;
        Ok(())
    }

    pub fn apply(&mut self, client: &Client) -> Result<()> {
        *self = client.apply(self)?;
        Ok(())
    }

    pub fn replace(&mut self, client: &Client) -> Result<()> {
        *self = client.replace(self)?;
        Ok(())
    }

    pub fn delete(&self, client: &Client, ignore_not_found: bool) -> Result<()> {
        client.delete_in(&self.resource_ref()?, self.namespace(), ignore_not_found)
    }

    /// Label the server-side object, then refresh.
    pub fn push_labels<K, V>(
        &mut self,
        client: &Client,
        changes: &[(K, Option<V>)],
        overwrite: bool,
    ) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.metadata_verb(client, "label", metadata_change_args(changes, overwrite))
    }

    /// Annotate the server-side object, then refresh.
    pub fn push_annotations<K, V>(
        &mut self,
        client: &Client,
        changes: &[(K, Option<V>)],
        overwrite: bool,
    ) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.metadata_verb(client, "annotate", metadata_change_args(changes, overwrite))
    }

    fn metadata_verb(&mut self, client: &Client, verb: &str, args: Vec<String>) -> Result<()> {
        let request = CommandRequest::new(verb)
            .arg(self.resource_ref()?.qualified_name())
            .args(args);
        client.invoke_checked(&with_namespace(request, self.namespace()))?;
        self.refresh(client)
    }

    /// Static selector naming just this object.
    pub fn selector(&self, client: &Client) -> Result<Selector> {
        let mut selector = Selector::fixed(client.clone(), vec![self.resource_ref()?]);
        if let Some(ns) = self.namespace() {
            selector = selector.in_namespace(ns);
        }
        Ok(selector)
    }

    /// Optimistic modify-and-apply using the client's retry policy.
    pub fn modify_and_apply<F>(&mut self, client: &Client, mutate: F) -> Result<ApplyOutcome>
    where
        F: FnMut(&mut ApiObject) -> bool,
    {
        apply::modify_and_apply(client, self, client.retry_policy(), mutate)
    }
}

impl From<Node> for ApiObject {
    fn from(root: Node) -> Self {
        Self::new(root)
    }
}

/// `key=value` for sets and `key-` for removals, plus `--overwrite`.
pub(crate) fn metadata_change_args<K, V>(changes: &[(K, Option<V>)], overwrite: bool) -> Vec<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut args: Vec<String> = changes
        .iter()
        .map(|(key, value)| match value {
            Some(value) => format!("{}={}", key.as_ref(), value.as_ref()),
            None => format!("{}-", key.as_ref()),
        })
        .collect();
    if overwrite {
        args.push("--overwrite".to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> ApiObject {
        ApiObject::new(Node::from(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "prod",
                "resourceVersion": "7",
                "labels": {"app": "web"},
                "annotations": {"app.kubernetes.io/name": "web"}
            }
        })))
    }

    #[test]
    fn identity_reads_fixed_paths() {
        let obj = deployment();
        assert_eq!(obj.kind(), Some("Deployment"));
        assert_eq!(obj.name(), Some("web"));
        assert_eq!(obj.namespace(), Some("prod"));
        assert_eq!(obj.resource_version(), Some("7"));
        assert_eq!(obj.uid(), None);
        assert_eq!(obj.qname(), "deployment.apps/web");
        assert_eq!(obj.label("app"), Some("web"));
        assert_eq!(obj.annotation("app.kubernetes.io/name"), Some("web"));
    }

    #[test]
    fn core_group_has_no_suffix() {
        let obj = ApiObject::new(Node::from(json!({
            "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg"}
        })));
        assert_eq!(obj.qname(), "configmap/cfg");
        assert!(obj.is_kind("cm"));
        assert!(obj.is_kind("configmaps"));
        assert!(!obj.is_kind("secret"));
    }

    #[test]
    fn is_kind_accepts_group_qualified_names() {
        let obj = deployment();
        assert!(obj.is_kind("deploy"));
        assert!(obj.is_kind("deployment.apps"));
    }

    #[test]
    fn unnamed_object_has_no_ref() {
        let obj = ApiObject::new(Node::from(json!({"kind": "Pod"})));
        assert!(matches!(obj.resource_ref(), Err(Error::InvalidRef(_))));
    }

    #[test]
    fn list_payload_expands_to_items() {
        let list = ApiObject::new(Node::from(json!({
            "kind": "List",
            "items": [
                {"kind": "Pod", "metadata": {"name": "a"}},
                {"kind": "Pod", "metadata": {"name": "b"}}
            ]
        })));
        let names: Vec<_> = list
            .elements()
            .iter()
            .map(|o| o.name().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(deployment().elements().len(), 1);
    }

    #[test]
    fn local_label_edits() {
        let mut obj = deployment();
        obj.set_label("tier", Some("front")).set_label("app", None);
        assert_eq!(obj.label("tier"), Some("front"));
        assert_eq!(obj.label("app"), None);
        assert!(obj.model()["metadata"]["labels"]["app"].is_missing());
    }

    #[test]
    fn change_args_render_removals() {
        let changes = [("app", Some("web")), ("legacy", None)];
        assert_eq!(
            metadata_change_args(&changes, true),
            vec!["app=web", "legacy-", "--overwrite"]
        );
    }
}
