//! Reusable "which resources" descriptions.
//!
//! A [`Selector`] is either static (explicit `kind/name` references, fixed
//! membership) or dynamic (kinds plus label/field matchers, re-queried on
//! every operation). Read operations enumerate, count or fetch; verb
//! operations run one invocation per resolved resource and report per-resource
//! outcomes without rolling anything back.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, instrument, warn};

use crate::apply::{self, ApplyOutcome};
use crate::client::{Client, with_namespace};
use crate::core::kind::ResourceRef;
use crate::core::matcher::{FieldMatcher, FieldPredicate, LabelMatcher, LabelPredicate};
use crate::core::model::Node;
use crate::core::types::RetryPolicy;
use crate::error::{BulkFailure, Error, ResourceFailure, Result};
use crate::io::runner::CommandRequest;
use crate::object::{ApiObject, metadata_change_args};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Static(Vec<ResourceRef>),
    Dynamic {
        kinds: Vec<ResourceRef>,
        labels: LabelMatcher,
        fields: FieldMatcher,
        all_namespaces: bool,
    },
}

/// Resources a bulk verb changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Selector {
    client: Client,
    target: Target,
    namespace: Option<String>,
}

/// A resolved resource: qualified name plus the namespace to address it in.
struct Resolved {
    qname: String,
    namespace: Option<String>,
}

impl Selector {
    pub(crate) fn fixed(client: Client, refs: Vec<ResourceRef>) -> Self {
        Self {
            client,
            target: Target::Static(refs),
            namespace: None,
        }
    }

    pub(crate) fn dynamic(client: Client, kinds: Vec<ResourceRef>) -> Self {
        Self {
            client,
            target: Target::Dynamic {
                kinds,
                labels: LabelMatcher::default(),
                fields: FieldMatcher::default(),
                all_namespaces: false,
            },
            namespace: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is_static(&self) -> bool {
        matches!(self.target, Target::Static(_))
    }

    /// True when nothing can match: no references or no kinds.
    pub fn is_empty(&self) -> bool {
        match &self.target {
            Target::Static(refs) => refs.is_empty(),
            Target::Dynamic { kinds, .. } => kinds.is_empty(),
        }
    }

    pub fn label_eq(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_label(LabelPredicate::Equals(key.into(), value.into()))
    }

    pub fn label_ne(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_label(LabelPredicate::NotEquals(key.into(), value.into()))
    }

    pub fn label_exists(self, key: impl Into<String>) -> Self {
        self.with_label(LabelPredicate::Exists(key.into()))
    }

    pub fn label_absent(self, key: impl Into<String>) -> Self {
        self.with_label(LabelPredicate::NotExists(key.into()))
    }

    /// Require every `key=value` pair.
    pub fn labels<I, K, V>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        labels
            .into_iter()
            .fold(self, |selector, (k, v)| selector.label_eq(k, v))
    }

    /// Add predicates parsed from `-l` syntax.
    pub fn label_selector(self, expr: &str) -> Self {
        LabelMatcher::parse(expr)
            .predicates()
            .iter()
            .cloned()
            .fold(self, Self::with_label)
    }

    /// Add predicates parsed from `--field-selector` syntax.
    pub fn field_selector(self, expr: &str) -> Self {
        FieldMatcher::parse(expr)
            .predicates()
            .iter()
            .cloned()
            .fold(self, Self::with_field)
    }

    pub fn field_eq(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(FieldPredicate {
            field: field.into(),
            value: value.into(),
            negated: false,
        })
    }

    pub fn field_ne(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(FieldPredicate {
            field: field.into(),
            value: value.into(),
            negated: true,
        })
    }

    pub fn all_namespaces(mut self) -> Self {
        match &mut self.target {
            Target::Dynamic { all_namespaces, .. } => *all_namespaces = true,
            Target::Static(_) => warn!("all_namespaces ignored on a static selector"),
        }
        self
    }

    /// Address resources in `namespace` instead of the context's namespace.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    // Matchers only narrow dynamic selectors; the tool rejects names
    // combined with a selector.
    fn with_label(mut self, predicate: LabelPredicate) -> Self {
        match &mut self.target {
            Target::Dynamic { labels, .. } => labels.push(predicate),
            Target::Static(_) => warn!(%predicate, "label matcher ignored on a static selector"),
        }
        self
    }

    fn with_field(mut self, predicate: FieldPredicate) -> Self {
        match &mut self.target {
            Target::Dynamic { fields, .. } => fields.push(predicate),
            Target::Static(_) => warn!(field = %predicate.field, "field matcher ignored on a static selector"),
        }
        self
    }

    fn static_names(refs: &[ResourceRef]) -> Vec<String> {
        refs.iter().map(ResourceRef::qualified_name).collect()
    }

    fn query(&self, format: &str) -> CommandRequest {
        let request = match &self.target {
            Target::Static(refs) => CommandRequest::new("get")
                .args(Self::static_names(refs))
                .args(["-o", format, "--ignore-not-found"]),
            Target::Dynamic {
                kinds,
                labels,
                fields,
                all_namespaces,
            } => {
                let kinds = kinds
                    .iter()
                    .map(ResourceRef::kind)
                    .collect::<Vec<_>>()
                    .join(",");
                let mut request = CommandRequest::new("get").args([kinds.as_str(), "-o", format]);
                if let Some(l) = labels.render() {
                    request = request.arg("-l").arg(l);
                }
                if let Some(f) = fields.render() {
                    request = request.arg("--field-selector").arg(f);
                }
                if *all_namespaces {
                    request = request.arg("--all-namespaces");
                }
                request
            }
        };
        self.scope(request)
    }

    fn scope(&self, request: CommandRequest) -> CommandRequest {
        if self.is_all_namespaces() {
            return request;
        }
        with_namespace(request, self.namespace.as_deref())
    }

    fn is_all_namespaces(&self) -> bool {
        matches!(
            self.target,
            Target::Dynamic {
                all_namespaces: true,
                ..
            }
        )
    }

    fn selection_error(&self, message: impl Into<String>) -> Error {
        Error::Selection {
            selector: self.to_string(),
            message: message.into(),
        }
    }

    /// Qualified names of matching resources.
    ///
    /// Static selectors return their fixed list without invoking anything.
    #[instrument(skip_all, fields(selector = %self))]
    pub fn names(&self) -> Result<Vec<String>> {
        if let Target::Static(refs) = &self.target {
            return Ok(Self::static_names(refs));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.client.invoke_checked(&self.query("name"))?;
        let names: Vec<String> = parse_name_lines(&result.stdout_text());
        debug!(count = names.len(), "resolved names");
        Ok(names)
    }

    /// Number of matching resources that currently exist. Missing ones are
    /// excluded, never an error.
    #[instrument(skip_all, fields(selector = %self))]
    pub fn count_existing(&self) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        match &self.target {
            Target::Static(_) => {
                let result = self.client.invoke_checked(&self.query("name"))?;
                Ok(parse_name_lines(&result.stdout_text()).len())
            }
            Target::Dynamic { .. } => Ok(self.names()?.len()),
        }
    }

    /// Full objects for every match, in the order the tool reports them.
    #[instrument(skip_all, fields(selector = %self))]
    pub fn objects(&self) -> Result<Vec<ApiObject>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.client.invoke_checked(&self.query("json"))?;
        // `--ignore-not-found` prints nothing when every target is absent.
        if result.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let root = Node::from_json_slice(&result.stdout).map_err(|source| Error::Parse {
            what: format!("output of `{}`", result.command),
            source,
        })?;
        let objects = ApiObject::new(root).elements();
        debug!(count = objects.len(), "fetched objects");
        Ok(objects)
    }

    /// Exactly one object, otherwise [`Error::Selection`].
    pub fn object(&self) -> Result<ApiObject> {
        let mut objects = self.objects()?;
        match objects.len() {
            1 => Ok(objects.remove(0)),
            n => Err(self.selection_error(format!("expected exactly one object, found {n}"))),
        }
    }

    /// Zero or one object; more is an [`Error::Selection`].
    pub fn object_opt(&self) -> Result<Option<ApiObject>> {
        let mut objects = self.objects()?;
        match objects.len() {
            0 => Ok(None),
            1 => Ok(Some(objects.remove(0))),
            n => Err(self.selection_error(format!("expected at most one object, found {n}"))),
        }
    }

    fn resolve(&self) -> Result<Vec<Resolved>> {
        if self.is_all_namespaces() {
            // `-o name` drops the namespace, so fetch objects to keep it.
            return Ok(self
                .objects()?
                .iter()
                .map(|obj| Resolved {
                    qname: obj.qname(),
                    namespace: obj.namespace().map(str::to_string),
                })
                .collect());
        }
        Ok(self
            .names()?
            .into_iter()
            .map(|qname| Resolved {
                qname,
                namespace: self.namespace.clone(),
            })
            .collect())
    }

    /// Run `verb <resource> args...` once per matching resource.
    #[instrument(skip_all, fields(selector = %self, verb))]
    pub fn perform<I, S>(&self, verb: &str, args: I) -> Result<BulkOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let targets = self.resolve()?;
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for target in targets {
            let request = with_namespace(
                CommandRequest::new(verb)
                    .arg(target.qname.as_str())
                    .args(args.iter().cloned()),
                target.namespace.as_deref(),
            );
            match self.client.invoke_checked(&request) {
                Ok(_) => succeeded.push(target.qname),
                Err(error) => {
                    warn!(resource = %target.qname, %error, "bulk verb failed on resource");
                    failed.push(ResourceFailure {
                        name: target.qname,
                        error,
                    });
                }
            }
        }
        if failed.is_empty() {
            debug!(count = succeeded.len(), "bulk verb succeeded");
            return Ok(BulkOutcome { succeeded });
        }
        Err(Error::Bulk(BulkFailure {
            verb: verb.to_string(),
            succeeded,
            failed,
        }))
    }

    /// `Some(v)` sets a label, `None` removes it.
    pub fn label<K, V>(&self, changes: &[(K, Option<V>)], overwrite: bool) -> Result<BulkOutcome>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.perform("label", metadata_change_args(changes, overwrite))
    }

    pub fn annotate<K, V>(&self, changes: &[(K, Option<V>)], overwrite: bool) -> Result<BulkOutcome>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.perform("annotate", metadata_change_args(changes, overwrite))
    }

    pub fn delete(&self, ignore_not_found: bool) -> Result<BulkOutcome> {
        let args: &[&str] = if ignore_not_found {
            &["--ignore-not-found"]
        } else {
            &[]
        };
        self.perform("delete", args.iter().copied())
    }

    /// Resolve the current matches into a static selector.
    pub fn freeze(&self) -> Result<Selector> {
        if self.is_static() {
            return Ok(self.clone());
        }
        let resolved = self.resolve()?;
        let mut namespace = self.namespace.clone();
        if self.is_all_namespaces() {
            let namespaces: BTreeMap<_, _> = resolved
                .iter()
                .map(|r| (r.namespace.clone(), ()))
                .collect();
            if namespaces.len() > 1 {
                return Err(self.selection_error("matches span several namespaces"));
            }
            namespace = namespaces.into_keys().next().flatten();
        }
        let refs = resolved
            .iter()
            .map(|r| ResourceRef::parse(&r.qname))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Selector {
            client: self.client.clone(),
            target: Target::Static(refs),
            namespace,
        })
    }

    /// Static selector keeping only matches of `kind`.
    pub fn narrow(&self, kind: &str) -> Result<Selector> {
        let mut frozen = self.freeze()?;
        if let Target::Static(refs) = &mut frozen.target {
            refs.retain(|r| r.kind_matches(kind));
        }
        Ok(frozen)
    }

    /// Static selector over the matches of both, without duplicates.
    pub fn union(&self, other: &Selector) -> Result<Selector> {
        let mut left = self.freeze()?;
        let right = other.freeze()?;
        if left.namespace != right.namespace {
            return Err(self.selection_error(format!(
                "cannot union with `{other}` in a different namespace"
            )));
        }
        if let (Target::Static(refs), Target::Static(extra)) = (&mut left.target, right.target) {
            for r in extra {
                if !refs.iter().any(|known| known.same_resource(&r)) {
                    refs.push(r);
                }
            }
        }
        Ok(left)
    }

    /// Modify-and-apply the single matched object.
    pub fn modify_and_apply<F>(
        &self,
        policy: RetryPolicy,
        mutate: F,
    ) -> Result<(ApiObject, ApplyOutcome)>
    where
        F: FnMut(&mut ApiObject) -> bool,
    {
        let mut object = self.object()?;
        let outcome = apply::modify_and_apply(&self.client, &mut object, policy, mutate)?;
        Ok((object, outcome))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            _ if self.is_empty() => f.write_str("<empty>")?,
            Target::Static(refs) => f.write_str(&Self::static_names(refs).join(","))?,
            Target::Dynamic {
                kinds,
                labels,
                fields,
                all_namespaces,
            } => {
                let kinds: Vec<&str> = kinds.iter().map(ResourceRef::kind).collect();
                f.write_str(&kinds.join(","))?;
                if let Some(l) = labels.render() {
                    write!(f, " -l {l}")?;
                }
                if let Some(fs) = fields.render() {
                    write!(f, " --field-selector {fs}")?;
                }
                if *all_namespaces {
                    f.write_str(" --all-namespaces")?;
                }
            }
        }
        if let Some(ns) = &self.namespace {
            write!(f, " (namespace {ns})")?;
        }
        Ok(())
    }
}

fn parse_name_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureKind;
    use crate::test_support::{FakeCluster, configmap, pod};

    fn cluster() -> (FakeCluster, Client) {
        let cluster = FakeCluster::new();
        cluster.insert(pod("web-0", &[("app", "web")]));
        cluster.insert(pod("web-1", &[("app", "web"), ("canary", "true")]));
        cluster.insert(pod("db-0", &[("app", "db")]));
        cluster.insert(configmap("cfg", &[("app", "web")]));
        let client = Client::with_runner(cluster.clone());
        (cluster, client)
    }

    #[test]
    fn static_names_do_not_invoke() {
        let (cluster, client) = cluster();
        let selector = client.selector_names(["pod/web-0", "po/missing"]).expect("selector");
        assert_eq!(
            selector.names().expect("names"),
            vec!["pod/web-0", "pod/missing"]
        );
        assert!(cluster.invocations().is_empty());
    }

    #[test]
    fn dynamic_names_requery_every_time() {
        let (cluster, client) = cluster();
        let selector = client.selector("pods").expect("selector").label_eq("app", "web");
        assert_eq!(selector.names().expect("names"), vec!["pod/web-0", "pod/web-1"]);

        cluster.insert(pod("web-2", &[("app", "web")]));
        assert_eq!(selector.names().expect("names").len(), 3);
        assert_eq!(cluster.invocations().len(), 2);
        assert_eq!(
            cluster.invocations()[0].render(),
            "get pod -o name -l app=web"
        );
    }

    #[test]
    fn count_excludes_missing_resources() {
        let (_, client) = cluster();
        let selector = client
            .selector_names(["pod/web-0", "pod/gone", "configmap/cfg"])
            .expect("selector");
        assert_eq!(selector.count_existing().expect("count"), 2);
    }

    #[test]
    fn empty_selector_never_invokes() {
        let (cluster, client) = cluster();
        let empty = client.empty_selector();
        assert_eq!(empty.count_existing().expect("count"), 0);
        assert!(empty.objects().expect("objects").is_empty());
        assert_eq!(
            empty.label(&[("x", Some("y"))], false).expect("label"),
            BulkOutcome::default()
        );
        assert!(cluster.invocations().is_empty());
    }

    #[test]
    fn objects_expand_lists_in_reported_order() {
        let (_, client) = cluster();
        let objects = client
            .selector_kinds(["pod", "cm"])
            .label_eq("app", "web")
            .objects()
            .expect("objects");
        let names: Vec<_> = objects.iter().map(ApiObject::qname).collect();
        assert_eq!(names, vec!["pod/web-0", "pod/web-1", "configmap/cfg"]);
    }

    #[test]
    fn single_static_object_and_missing_one() {
        let (_, client) = cluster();
        let found = client.selector("pod/db-0").expect("selector").object().expect("object");
        assert_eq!(found.label("app"), Some("db"));

        let gone = client.selector("pod/gone").expect("selector");
        assert!(gone.object_opt().expect("object_opt").is_none());
        assert!(matches!(gone.object(), Err(Error::Selection { .. })));
    }

    #[test]
    fn object_requires_exactly_one() {
        let (_, client) = cluster();
        let err = client
            .selector("pods")
            .expect("selector")
            .label_eq("app", "web")
            .object()
            .unwrap_err();
        assert!(err.to_string().contains("found 2"), "got {err}");
    }

    #[test]
    fn bulk_label_reports_partial_failure() {
        let (cluster, client) = cluster();
        cluster.insert(pod("web-2", &[("app", "web")]));
        cluster.fail_on(
            "label",
            "pod/web-1",
            "Error from server (Conflict): Operation cannot be fulfilled on pods \"web-1\": \
             the object has been modified",
        );
        let err = client
            .selector("pods")
            .expect("selector")
            .label_eq("app", "web")
            .label(&[("tier", Some("front"))], false)
            .unwrap_err();
        let Error::Bulk(bulk) = err else {
            panic!("expected bulk failure, got {err:?}");
        };
        assert_eq!(bulk.succeeded, vec!["pod/web-0", "pod/web-2"]);
        assert_eq!(bulk.failed.len(), 1);
        assert_eq!(bulk.failed[0].name, "pod/web-1");
        assert_eq!(bulk.failed[0].error.failure_kind(), Some(FailureKind::Conflict));

        for name in ["web-0", "web-2"] {
            let kept = client.get(&ResourceRef::named("pod", name)).expect("get");
            assert_eq!(kept.label("tier"), Some("front"));
        }
        let untouched = client.get(&ResourceRef::named("pod", "web-1")).expect("get");
        assert_eq!(untouched.label("tier"), None);
    }

    #[test]
    fn selector_without_kinds_is_empty() {
        let (cluster, client) = cluster();
        for empty in [
            client.selector_kinds(Vec::<&str>::new()),
            client.selector("").expect("selector"),
        ] {
            assert!(empty.is_empty());
            assert!(empty.names().expect("names").is_empty());
            assert_eq!(empty.count_existing().expect("count"), 0);
            assert!(empty.objects().expect("objects").is_empty());
            assert_eq!(empty.delete(false).expect("delete"), BulkOutcome::default());
            assert!(empty.freeze().expect("freeze").is_empty());
            assert_eq!(empty.to_string(), "<empty>");
        }
        assert!(cluster.invocations().is_empty());
    }

    #[test]
    fn static_and_reported_names_agree_on_groups() {
        let cluster = FakeCluster::new();
        cluster.insert(Node::from(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"}
        })));
        let client = Client::with_runner(cluster);

        let typed = client.selector("deploy/web").expect("selector");
        let reported = client.selector("deployments").expect("selector");
        assert_eq!(typed.names().expect("names"), reported.names().expect("names"));

        let both = typed.union(&reported).expect("union");
        assert_eq!(both.names().expect("names"), vec!["deployment.apps/web"]);
        assert_eq!(both.narrow("deploy").expect("narrow").names().expect("names").len(), 1);
        assert_eq!(typed.count_existing().expect("count"), 1);
    }

    #[test]
    fn annotate_removal_uses_dash_suffix() {
        let (cluster, client) = cluster();
        let selector = client.selector("pod/web-0").expect("selector");
        selector
            .annotate(&[("note", Some("hi"))], false)
            .expect("annotate");
        selector.annotate::<_, &str>(&[("note", None)], false).expect("remove");
        let renders: Vec<_> = cluster.invocations().iter().map(CommandRequest::render).collect();
        assert_eq!(
            renders,
            vec!["annotate pod/web-0 note=hi", "annotate pod/web-0 note-"]
        );
    }

    #[test]
    fn label_without_overwrite_fails_on_existing_key() {
        let (_, client) = cluster();
        let selector = client.selector("pod/web-0").expect("selector");
        assert!(selector.label(&[("app", Some("other"))], false).is_err());
        selector
            .label(&[("app", Some("other"))], true)
            .expect("overwrite");
    }

    #[test]
    fn delete_then_count() {
        let (_, client) = cluster();
        let selector = client.selector("pods").expect("selector").label_eq("app", "db");
        let outcome = selector.delete(false).expect("delete");
        assert_eq!(outcome.succeeded, vec!["pod/db-0"]);
        assert_eq!(selector.count_existing().expect("count"), 0);
    }

    #[test]
    fn freeze_narrow_union() {
        let (cluster, client) = cluster();
        let frozen = client
            .selector_kinds(["pod", "configmap"])
            .label_eq("app", "web")
            .freeze()
            .expect("freeze");
        assert!(frozen.is_static());

        cluster.insert(pod("web-9", &[("app", "web")]));
        assert_eq!(frozen.names().expect("names").len(), 3);

        let pods = frozen.narrow("po").expect("narrow");
        assert_eq!(pods.names().expect("names"), vec!["pod/web-0", "pod/web-1"]);

        let db = client.selector("pod/db-0").expect("selector");
        let both = pods.union(&db).expect("union").union(&db).expect("again");
        assert_eq!(
            both.names().expect("names"),
            vec!["pod/web-0", "pod/web-1", "pod/db-0"]
        );
    }

    #[test]
    fn matchers_and_namespace_render() {
        let client = Client::with_runner(FakeCluster::new());
        let selector = client
            .selector("pods")
            .expect("selector")
            .label_selector("app=web,!legacy")
            .field_ne("status.phase", "Running")
            .in_namespace("prod");
        assert_eq!(
            selector.to_string(),
            "pod -l app=web,!legacy --field-selector status.phase!=Running (namespace prod)"
        );
    }
}
