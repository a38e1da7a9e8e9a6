//! Resource kinds, references and qualified names.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Short names accepted by the cluster tool, expanded to the singular kind.
const ALIASES: &[(&str, &str)] = &[
    ("bc", "buildconfig"),
    ("cj", "cronjob"),
    ("cm", "configmap"),
    ("crd", "customresourcedefinition"),
    ("crds", "customresourcedefinition"),
    ("dc", "deploymentconfig"),
    ("deploy", "deployment"),
    ("ds", "daemonset"),
    ("ep", "endpoints"),
    ("ev", "event"),
    ("hpa", "horizontalpodautoscaler"),
    ("ing", "ingress"),
    ("is", "imagestream"),
    ("istag", "imagestreamtag"),
    ("limits", "limitrange"),
    ("netpol", "networkpolicy"),
    ("no", "node"),
    ("ns", "namespace"),
    ("pdb", "poddisruptionbudget"),
    ("po", "pod"),
    ("pv", "persistentvolume"),
    ("pvc", "persistentvolumeclaim"),
    ("quota", "resourcequota"),
    ("rc", "replicationcontroller"),
    ("rs", "replicaset"),
    ("sa", "serviceaccount"),
    ("sc", "storageclass"),
    ("sts", "statefulset"),
    ("svc", "service"),
];

/// Kinds whose plural spelling is normalized back to the singular.
const KNOWN_KINDS: &[&str] = &[
    "build",
    "buildconfig",
    "clusterrole",
    "clusterrolebinding",
    "configmap",
    "cronjob",
    "customresourcedefinition",
    "daemonset",
    "deployment",
    "deploymentconfig",
    "event",
    "horizontalpodautoscaler",
    "imagestream",
    "imagestreamtag",
    "ingress",
    "job",
    "limitrange",
    "namespace",
    "networkpolicy",
    "node",
    "persistentvolume",
    "persistentvolumeclaim",
    "pod",
    "poddisruptionbudget",
    "project",
    "replicaset",
    "replicationcontroller",
    "resourcequota",
    "role",
    "rolebinding",
    "route",
    "secret",
    "service",
    "serviceaccount",
    "statefulset",
    "storageclass",
    "template",
];

/// API groups of well-known kinds outside the core group. `-o name` prints
/// these kinds as `kind.group/name`.
const GROUPS: &[(&str, &str)] = &[
    ("build", "build.openshift.io"),
    ("buildconfig", "build.openshift.io"),
    ("clusterrole", "rbac.authorization.k8s.io"),
    ("clusterrolebinding", "rbac.authorization.k8s.io"),
    ("cronjob", "batch"),
    ("customresourcedefinition", "apiextensions.k8s.io"),
    ("daemonset", "apps"),
    ("deployment", "apps"),
    ("deploymentconfig", "apps.openshift.io"),
    ("horizontalpodautoscaler", "autoscaling"),
    ("imagestream", "image.openshift.io"),
    ("imagestreamtag", "image.openshift.io"),
    ("ingress", "networking.k8s.io"),
    ("job", "batch"),
    ("networkpolicy", "networking.k8s.io"),
    ("poddisruptionbudget", "policy"),
    ("project", "project.openshift.io"),
    ("replicaset", "apps"),
    ("role", "rbac.authorization.k8s.io"),
    ("rolebinding", "rbac.authorization.k8s.io"),
    ("route", "route.openshift.io"),
    ("statefulset", "apps"),
    ("storageclass", "storage.k8s.io"),
    ("template", "template.openshift.io"),
];

/// Lowercase plural as the server spells it in messages (`pods`, `policies`).
pub fn plural_of(kind: &str) -> String {
    if let Some(stem) = kind.strip_suffix('y') {
        format!("{stem}ies")
    } else if kind.ends_with('s') {
        format!("{kind}es")
    } else {
        format!("{kind}s")
    }
}

/// Normalize a kind as typed by a caller: lowercase, expand aliases,
/// singularize known plurals. An explicit API group suffix is kept; a
/// well-known kind without one gets its group, so `deploy` becomes
/// `deployment.apps` as `-o name` prints it.
pub fn normalize_kind(kind: &str) -> String {
    let lower = kind.trim().to_ascii_lowercase();
    let (base, group) = match lower.split_once('.') {
        Some((base, group)) => (base, Some(group)),
        None => (lower.as_str(), None),
    };
    let base = ALIASES
        .iter()
        .find(|(alias, _)| *alias == base)
        .map(|(_, full)| *full)
        .or_else(|| {
            KNOWN_KINDS
                .iter()
                .copied()
                .find(|known| *known == base || plural_of(known) == base)
        })
        .unwrap_or(base);
    let group = group.or_else(|| {
        GROUPS
            .iter()
            .find(|(known, _)| *known == base)
            .map(|(_, group)| *group)
    });
    match group {
        Some(group) => format!("{base}.{group}"),
        None => base.to_string(),
    }
}

/// Equal normalized kinds, or equal base kinds when only one side names a group.
fn same_kind(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (a.split_once('.'), b.split_once('.')) {
        (Some((base, _)), None) => base == b,
        (None, Some((base, _))) => a == base,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseRefError {
    #[error("empty resource reference")]
    Empty,
    #[error("resource reference `{0}` has an empty kind")]
    EmptyKind(String),
    #[error("resource reference `{0}` has an empty name")]
    EmptyName(String),
    #[error("resource reference `{0}` has more than one `/`")]
    TooManySegments(String),
}

/// One resource (`kind/name`) or a whole kind (`kind`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    kind: String,
    name: Option<String>,
}

impl ResourceRef {
    pub fn named(kind: &str, name: impl Into<String>) -> Self {
        Self {
            kind: normalize_kind(kind),
            name: Some(name.into()),
        }
    }

    pub fn kind_only(kind: &str) -> Self {
        Self {
            kind: normalize_kind(kind),
            name: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, ParseRefError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ParseRefError::Empty);
        }
        let mut parts = trimmed.split('/');
        let kind = parts.next().unwrap_or_default();
        let name = parts.next();
        if parts.next().is_some() {
            return Err(ParseRefError::TooManySegments(input.to_string()));
        }
        if kind.is_empty() {
            return Err(ParseRefError::EmptyKind(input.to_string()));
        }
        match name {
            Some("") => Err(ParseRefError::EmptyName(input.to_string())),
            Some(name) => Ok(Self::named(kind, name)),
            None => Ok(Self::kind_only(kind)),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Kind without any API group suffix.
    pub fn base_kind(&self) -> &str {
        self.kind.split_once('.').map_or(&self.kind, |(base, _)| base)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    /// True if `kind` (alias, plural or `kind.group`) names this reference's kind.
    pub fn kind_matches(&self, kind: &str) -> bool {
        same_kind(&self.kind, &normalize_kind(kind))
    }

    /// Both refer to the same resource, whether or not each spells the group.
    pub fn same_resource(&self, other: &ResourceRef) -> bool {
        self.name == other.name && same_kind(&self.kind, &other.kind)
    }

    /// `kind/name` for named references, `kind` otherwise.
    pub fn qualified_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}", self.kind, name),
            None => f.write_str(&self.kind),
        }
    }
}

impl FromStr for ResourceRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceRef::parse(s)
    }
}
