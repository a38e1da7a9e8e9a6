//! In-memory runners for tests.
//!
//! [`FakeCluster`] emulates the handful of verbs the library issues, with
//! kubectl-shaped stderr so the real classifier is exercised. Namespaces are
//! not modeled: namespace flags are accepted and ignored.
//! [`ScriptedRunner`] replays queued responses and records every call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;

use crate::core::kind::{ResourceRef, plural_of};
use crate::core::matcher::{FieldMatcher, LabelMatcher};
use crate::core::model::Node;
use crate::core::types::InvocationResult;
use crate::error::{Error, Result};
use crate::io::context::{ExecutionContext, Transport};
use crate::io::runner::{CommandRequest, CommandRunner, build_argv, check_ssh_exit};
use crate::object::ApiObject;

type Writer = Box<dyn FnMut(&mut Node) + Send>;

#[derive(Default)]
struct ClusterState {
    objects: Vec<Node>,
    invocations: Vec<CommandRequest>,
    failures: Vec<(String, String, String)>,
    pending_conflicts: usize,
    writer: Option<Writer>,
}

/// Shared in-memory cluster. Clones see the same state.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

struct Reply {
    status: i32,
    stdout: String,
    stderr: String,
}

impl Reply {
    fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn err(stderr: impl Into<String>) -> Self {
        Self {
            status: 1,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Default)]
struct ParsedArgs {
    positional: Vec<String>,
    output: Option<String>,
    labels: Option<String>,
    fields: Option<String>,
    ignore_not_found: bool,
    overwrite: bool,
}

fn parse_args(args: &[String]) -> ParsedArgs {
    let mut parsed = ParsedArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-o" | "--output" => parsed.output = iter.next().cloned(),
            "-l" | "--selector" => parsed.labels = iter.next().cloned(),
            "--field-selector" => parsed.fields = iter.next().cloned(),
            "--ignore-not-found" => parsed.ignore_not_found = true,
            "--overwrite" => parsed.overwrite = true,
            "-f" | "-n" => {
                iter.next();
            }
            other if other.starts_with('-') => {}
            other => parsed.positional.push(other.to_string()),
        }
    }
    parsed
}

fn qname_of(node: &Node) -> String {
    ApiObject::new(node.clone()).qname()
}

fn matches_ref(node: &Node, reference: &ResourceRef) -> bool {
    let object = ApiObject::new(node.clone());
    object.is_kind(reference.kind()) && object.name() == reference.name()
}

fn bump_version(node: &mut Node) {
    let next = node
        .at("metadata.resourceVersion")
        .as_str()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    node.set_at("metadata.resourceVersion", next.to_string());
}

fn not_found(reference: &ResourceRef, context: &str) -> String {
    format!(
        "Error from server (NotFound): {context}{} \"{}\" not found",
        plural_of(reference.base_kind()),
        reference.name().unwrap_or_default()
    )
}

fn list(items: Vec<Node>) -> Node {
    let mut list = Node::from(json!({"apiVersion": "v1", "kind": "List", "metadata": {"resourceVersion": ""}}));
    list.set_at("items", Node::Sequence(items));
    list
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object as-is, giving it resourceVersion `1` if it has none.
    pub fn insert(&self, mut object: Node) {
        if object.at("metadata.resourceVersion").is_missing() {
            object.set_at("metadata.resourceVersion", "1");
        }
        let qname = qname_of(&object);
        let mut state = self.lock();
        match state.objects.iter_mut().find(|o| qname_of(o) == qname) {
            Some(existing) => *existing = object,
            None => state.objects.push(object),
        }
    }

    /// Current stored copy.
    pub fn get(&self, qname: &str) -> Option<ApiObject> {
        let reference = ResourceRef::parse(qname).ok()?;
        self.lock()
            .objects
            .iter()
            .find(|o| matches_ref(o, &reference))
            .cloned()
            .map(ApiObject::new)
    }

    pub fn objects(&self) -> Vec<ApiObject> {
        self.lock().objects.iter().cloned().map(ApiObject::new).collect()
    }

    /// Every request received, in order.
    pub fn invocations(&self) -> Vec<CommandRequest> {
        self.lock().invocations.clone()
    }

    pub fn clear_invocations(&self) {
        self.lock().invocations.clear();
    }

    /// Make `verb` on `qname` exit 1 with `stderr` from now on.
    pub fn fail_on(&self, verb: &str, qname: &str, stderr: &str) {
        self.lock()
            .failures
            .push((verb.to_string(), qname.to_string(), stderr.to_string()));
    }

    /// Simulate a concurrent writer: the next `count` replaces first let
    /// `writer` modify the stored object (bumping its resourceVersion), so the
    /// submitted payload is stale and conflicts.
    pub fn conflict_next_replaces<F>(&self, count: usize, writer: F)
    where
        F: FnMut(&mut Node) + Send + 'static,
    {
        let mut state = self.lock();
        state.pending_conflicts = count;
        state.writer = Some(Box::new(writer));
    }

    fn injected_failure(state: &ClusterState, verb: &str, qname: &str) -> Option<Reply> {
        state
            .failures
            .iter()
            .find(|(v, q, _)| v == verb && q == qname)
            .map(|(_, _, stderr)| Reply::err(stderr.clone()))
    }

    fn dispatch(state: &mut ClusterState, request: &CommandRequest) -> Reply {
        let args = parse_args(&request.args);
        match request.verb.as_str() {
            "get" => Self::get_verb(state, &args),
            "label" => Self::metadata_verb(state, "label", "labels", &args),
            "annotate" => Self::metadata_verb(state, "annotate", "annotations", &args),
            "delete" => Self::delete_verb(state, &args),
            "create" | "replace" | "apply" => {
                let payload = match request.stdin.as_deref().map(Node::from_json_slice) {
                    Some(Ok(payload)) => payload,
                    _ => return Reply::err("error: no objects passed to apply"),
                };
                Self::submit_verb(state, &request.verb, payload)
            }
            other => Reply::err(format!("error: unknown command \"{other}\" for \"kubectl\"")),
        }
    }

    fn get_verb(state: &ClusterState, args: &ParsedArgs) -> Reply {
        let output = args.output.as_deref().unwrap_or("json");
        let named = args.positional.iter().any(|p| p.contains('/'));
        let mut found = Vec::new();
        let mut errors = Vec::new();

        if named {
            for target in &args.positional {
                let Ok(reference) = ResourceRef::parse(target) else {
                    return Reply::err(format!("error: invalid resource name \"{target}\""));
                };
                match state.objects.iter().find(|o| matches_ref(o, &reference)) {
                    Some(object) => found.push(object.clone()),
                    None if args.ignore_not_found => {}
                    None => errors.push(not_found(&reference, "")),
                }
            }
        } else {
            let labels = args.labels.as_deref().map(LabelMatcher::parse).unwrap_or_default();
            let fields = args.fields.as_deref().map(FieldMatcher::parse).unwrap_or_default();
            let kinds = args.positional.first().map(String::as_str).unwrap_or_default();
            for kind in kinds.split(',').filter(|k| !k.is_empty()) {
                for object in &state.objects {
                    let api = ApiObject::new(object.clone());
                    if api.is_kind(kind) && labels.matches(&api.labels()) && fields.matches(object) {
                        found.push(object.clone());
                    }
                }
            }
        }

        let stdout = match output {
            "name" => found
                .iter()
                .map(|o| format!("{}\n", qname_of(o)))
                .collect::<String>(),
            _ if named && args.positional.len() == 1 => found
                .first()
                .map(Node::to_json_pretty)
                .unwrap_or_default(),
            _ => list(found).to_json_pretty(),
        };

        if errors.is_empty() {
            Reply::ok(stdout)
        } else {
            Reply {
                status: 1,
                stdout,
                stderr: errors.join("\n"),
            }
        }
    }

    fn metadata_verb(state: &mut ClusterState, verb: &str, field: &str, args: &ParsedArgs) -> Reply {
        let Some((target, changes)) = args.positional.split_first() else {
            return Reply::err(format!("error: one or more resources must be specified for {verb}"));
        };
        let Ok(reference) = ResourceRef::parse(target) else {
            return Reply::err(format!("error: invalid resource name \"{target}\""));
        };
        let Some(object) = state.objects.iter().find(|o| matches_ref(o, &reference)) else {
            return Reply::err(not_found(&reference, ""));
        };
        let qname = qname_of(object);
        if let Some(reply) = Self::injected_failure(state, verb, &qname) {
            return reply;
        }

        let mut updated = object.clone();
        for change in changes {
            if let Some(key) = change.strip_suffix('-') {
                updated.set(&crate::path!["metadata", field, key], Node::Missing);
                continue;
            }
            let Some((key, value)) = change.split_once('=') else {
                return Reply::err(format!("error: invalid {verb} spec: {change}"));
            };
            let existing = updated["metadata"][field][key].as_str();
            if let Some(old) = existing
                && old != value
                && !args.overwrite
            {
                return Reply::err(format!(
                    "error: '{key}' already has a value ({old}), and --overwrite is false"
                ));
            }
            updated.set(&crate::path!["metadata", field, key], value);
        }
        bump_version(&mut updated);

        let past = if verb == "label" { "labeled" } else { "annotated" };
        if let Some(slot) = state.objects.iter_mut().find(|o| matches_ref(o, &reference)) {
            *slot = updated;
        }
        Reply::ok(format!("{qname} {past}\n"))
    }

    fn delete_verb(state: &mut ClusterState, args: &ParsedArgs) -> Reply {
        let mut stdout = String::new();
        for target in &args.positional {
            let Ok(reference) = ResourceRef::parse(target) else {
                return Reply::err(format!("error: invalid resource name \"{target}\""));
            };
            let Some(index) = state.objects.iter().position(|o| matches_ref(o, &reference)) else {
                if args.ignore_not_found {
                    continue;
                }
                return Reply::err(not_found(&reference, ""));
            };
            let qname = qname_of(&state.objects[index]);
            if let Some(reply) = Self::injected_failure(state, "delete", &qname) {
                return reply;
            }
            state.objects.remove(index);
            stdout.push_str(&format!(
                "{} \"{}\" deleted\n",
                reference.base_kind(),
                reference.name().unwrap_or_default()
            ));
        }
        Reply::ok(stdout)
    }

    fn submit_verb(state: &mut ClusterState, verb: &str, mut payload: Node) -> Reply {
        let qname = qname_of(&payload);
        let Ok(reference) = ResourceRef::parse(&qname) else {
            return Reply::err("error: resource name may not be empty");
        };
        if let Some(reply) = Self::injected_failure(state, verb, &qname) {
            return reply;
        }
        let plural = plural_of(reference.base_kind());
        let name = reference.name().unwrap_or_default().to_string();
        let index = state.objects.iter().position(|o| matches_ref(o, &reference));

        match (verb, index) {
            ("create", Some(_)) => {
                return Reply::err(format!(
                    "Error from server (AlreadyExists): error when creating \"STDIN\": {plural} \"{name}\" already exists"
                ));
            }
            ("create", None) => {
                payload.set_at("metadata.resourceVersion", "1");
                state.objects.push(payload.clone());
            }
            ("replace", None) => {
                return Reply::err(not_found(&reference, "error when replacing \"STDIN\": "));
            }
            ("replace", Some(index)) => {
                if state.pending_conflicts > 0 {
                    state.pending_conflicts -= 1;
                    let stored = &mut state.objects[index];
                    if let Some(writer) = state.writer.as_mut() {
                        writer(stored);
                    }
                    bump_version(stored);
                }
                let stored = &mut state.objects[index];
                let current = stored.at("metadata.resourceVersion").as_str().map(str::to_string);
                let submitted = payload.at("metadata.resourceVersion").as_str();
                if submitted.is_some() && submitted != current.as_deref() {
                    return Reply::err(format!(
                        "Error from server (Conflict): error when replacing \"STDIN\": Operation cannot be fulfilled on {plural} \"{name}\": the object has been modified; please apply your changes to the latest version and try again"
                    ));
                }
                payload.set_at("metadata.resourceVersion", current.unwrap_or_default());
                bump_version(&mut payload);
                *stored = payload.clone();
            }
            (_, Some(index)) => {
                let stored = &mut state.objects[index];
                let current = stored.at("metadata.resourceVersion").as_str().map(str::to_string);
                payload.set_at("metadata.resourceVersion", current.unwrap_or_default());
                bump_version(&mut payload);
                *stored = payload.clone();
            }
            (_, None) => {
                payload.set_at("metadata.resourceVersion", "1");
                state.objects.push(payload.clone());
            }
        }
        Reply::ok(payload.to_json_pretty())
    }
}

impl CommandRunner for FakeCluster {
    fn run(&self, ctx: &ExecutionContext, request: &CommandRequest) -> Result<InvocationResult> {
        let mut state = self.lock();
        state.invocations.push(request.clone());
        let reply = Self::dispatch(&mut state, request);
        Ok(InvocationResult {
            command: build_argv(ctx, request).join(" "),
            status: reply.status,
            stdout: reply.stdout.into_bytes(),
            stderr: reply.stderr.into_bytes(),
            elapsed: Duration::ZERO,
        })
    }
}

/// A queued response for [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Exit {
        status: i32,
        stdout: String,
        stderr: String,
    },
    LaunchFailure,
    TransportFailure(String),
    Timeout,
}

impl Scripted {
    pub fn exit(status: i32, stdout: &str, stderr: &str) -> Self {
        Scripted::Exit {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    pub fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }
}

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<Scripted>,
    calls: Vec<(ExecutionContext, CommandRequest)>,
}

/// Runner that replays queued responses in order.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedRunner {
    pub fn new(responses: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                queue: responses.into_iter().collect(),
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, response: Scripted) {
        self.lock().queue.push_back(response);
    }

    /// Context and request of every call, in order.
    pub fn calls(&self) -> Vec<(ExecutionContext, CommandRequest)> {
        self.lock().calls.clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, ctx: &ExecutionContext, request: &CommandRequest) -> Result<InvocationResult> {
        let mut state = self.lock();
        state.calls.push((ctx.clone(), request.clone()));
        let command = build_argv(ctx, request).join(" ");
        match state.queue.pop_front() {
            Some(Scripted::Exit {
                status,
                stdout,
                stderr,
            }) => {
                if let Transport::Ssh(target) = &ctx.transport {
                    check_ssh_exit(target, &ctx.binary, status, stdout.as_bytes(), stderr.as_bytes())?;
                }
                Ok(InvocationResult {
                    command,
                    status,
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                    elapsed: Duration::ZERO,
                })
            }
            Some(Scripted::LaunchFailure) => Err(Error::Launch {
                program: ctx.binary.clone(),
                source: std::io::ErrorKind::NotFound.into(),
            }),
            Some(Scripted::TransportFailure(message)) => Err(Error::Transport {
                host: ctx.transport.label().to_string(),
                message,
            }),
            Some(Scripted::Timeout) => Err(Error::Timeout {
                command,
                after: ctx.timeout,
            }),
            None => Err(Error::io(
                format!("no scripted response left for `{}`", request.render()),
                std::io::Error::other("script exhausted"),
            )),
        }
    }
}

fn labelled(kind: &str, name: &str, labels: &[(&str, &str)]) -> Node {
    let mut node = Node::from(json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": {"name": name, "namespace": "default"}
    }));
    for (key, value) in labels {
        node.set(&crate::path!["metadata", "labels", *key], *value);
    }
    node
}

/// A running pod with the given labels.
pub fn pod(name: &str, labels: &[(&str, &str)]) -> Node {
    let mut node = labelled("Pod", name, labels);
    node.set_at("spec.containers[0].name", "main");
    node.set_at("spec.containers[0].image", "nginx");
    node.set_at("status.phase", "Running");
    node
}

/// An empty config map with the given labels.
pub fn configmap(name: &str, labels: &[(&str, &str)]) -> Node {
    let mut node = labelled("ConfigMap", name, labels);
    node.set_at("data", Node::object());
    node
}
