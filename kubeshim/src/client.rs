//! Command invoker: builds tool requests, runs them under the effective
//! context and turns failures into typed errors.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::core::classifier::classify;
use crate::core::kind::ResourceRef;
use crate::core::model::Node;
use crate::core::types::{InvocationResult, RetryPolicy};
use crate::error::{Error, RemoteFailure, Result};
use crate::io::config::KubeshimConfig;
use crate::io::context::ExecutionContext;
use crate::io::runner::{CommandRequest, CommandRunner, ProcessRunner};
use crate::object::ApiObject;
use crate::selector::Selector;

/// Handle for talking to one cluster through the tool.
///
/// Cheap to clone. Without a pinned context every call runs under
/// [`ExecutionContext::current`] at the time of the call.
#[derive(Clone)]
pub struct Client {
    runner: Arc<dyn CommandRunner>,
    pinned: Option<ExecutionContext>,
    retry: RetryPolicy,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pinned", &self.pinned)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client that spawns the real tool.
    pub fn new() -> Self {
        Self::with_runner(ProcessRunner)
    }

    pub fn with_runner(runner: impl CommandRunner + 'static) -> Self {
        Self {
            runner: Arc::new(runner),
            pinned: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Process runner pinned to the configured context and retry policy.
    pub fn from_config(cfg: &KubeshimConfig) -> Self {
        Self::new()
            .pinned(cfg.execution_context())
            .with_retry_policy(cfg.retry_policy())
    }

    /// Ignore scoped contexts and always run under `ctx`.
    pub fn pinned(mut self, ctx: ExecutionContext) -> Self {
        self.pinned = Some(ctx);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Context the next invocation will run under.
    pub fn context(&self) -> ExecutionContext {
        self.pinned
            .clone()
            .unwrap_or_else(ExecutionContext::current)
    }

    /// Run a request. A non-zero exit is returned as data.
    #[instrument(skip_all, fields(verb = %request.verb))]
    pub fn invoke(&self, request: &CommandRequest) -> Result<InvocationResult> {
        let ctx = self.context();
        debug!(command = %request.render(), "invoke");
        self.runner.run(&ctx, request)
    }

    /// Run a request and turn a non-zero exit into a classified [`Error::Remote`].
    pub fn invoke_checked(&self, request: &CommandRequest) -> Result<InvocationResult> {
        let result = self.invoke(request)?;
        if result.success() {
            return Ok(result);
        }
        let stderr = result.stderr_text().into_owned();
        let kind = classify(&stderr);
        warn!(command = %result.command, status = result.status, %kind, "remote failure");
        Err(Error::Remote(RemoteFailure {
            kind,
            command: result.command,
            status: result.status,
            stderr,
        }))
    }

    /// Checked invoke, then parse stdout as JSON.
    pub fn invoke_json(&self, request: &CommandRequest) -> Result<Node> {
        let result = self.invoke_checked(request)?;
        Node::from_json_slice(&result.stdout).map_err(|source| Error::Parse {
            what: format!("output of `{}`", result.command),
            source,
        })
    }

    /// Selector from a target string: `kind/name[,kind/name]` is static,
    /// `kind[,kind]` is dynamic.
    pub fn selector(&self, target: &str) -> Result<Selector> {
        if target.contains('/') {
            self.selector_names(target.split(',').map(str::trim).filter(|t| !t.is_empty()))
        } else {
            Ok(self.selector_kinds(target.split(',').map(str::trim).filter(|t| !t.is_empty())))
        }
    }

    /// Dynamic selector over whole kinds.
    pub fn selector_kinds<I, S>(&self, kinds: I) -> Selector
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let kinds = kinds
            .into_iter()
            .map(|k| ResourceRef::kind_only(k.as_ref()))
            .collect();
        Selector::dynamic(self.clone(), kinds)
    }

    /// Static selector over explicit `kind/name` references.
    pub fn selector_names<I, S>(&self, names: I) -> Result<Selector>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let refs = names
            .into_iter()
            .map(|name| {
                let parsed = ResourceRef::parse(name.as_ref())?;
                if !parsed.is_named() {
                    return Err(Error::Selection {
                        selector: name.as_ref().to_string(),
                        message: "expected a qualified `kind/name`".to_string(),
                    });
                }
                Ok(parsed)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Selector::fixed(self.clone(), refs))
    }

    /// Static selector matching nothing.
    pub fn empty_selector(&self) -> Selector {
        Selector::fixed(self.clone(), Vec::new())
    }

    pub fn get(&self, target: &ResourceRef) -> Result<ApiObject> {
        self.get_in(target, None)
    }

    /// Fetch one resource, optionally in an explicit namespace.
    pub fn get_in(&self, target: &ResourceRef, namespace: Option<&str>) -> Result<ApiObject> {
        let request = with_namespace(
            CommandRequest::new("get").args([target.qualified_name(), "-o".into(), "json".into()]),
            namespace,
        );
        self.invoke_json(&request).map(ApiObject::new)
    }

    /// Like [`Client::get`], but absence is `None`.
    pub fn get_opt(&self, target: &ResourceRef) -> Result<Option<ApiObject>> {
        match self.get(target) {
            Ok(object) => Ok(Some(object)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn create(&self, object: &ApiObject) -> Result<ApiObject> {
        self.submit("create", object)
    }

    pub fn apply(&self, object: &ApiObject) -> Result<ApiObject> {
        self.submit("apply", object)
    }

    /// Replace the stored object. Fails with a conflict when the payload's
    /// `resourceVersion` is stale.
    pub fn replace(&self, object: &ApiObject) -> Result<ApiObject> {
        self.submit("replace", object)
    }

    pub fn delete(&self, target: &ResourceRef, ignore_not_found: bool) -> Result<()> {
        self.delete_in(target, None, ignore_not_found)
    }

    pub fn delete_in(
        &self,
        target: &ResourceRef,
        namespace: Option<&str>,
        ignore_not_found: bool,
    ) -> Result<()> {
        let mut request = CommandRequest::new("delete").arg(target.qualified_name());
        if ignore_not_found {
            request = request.arg("--ignore-not-found");
        }
        self.invoke_checked(&with_namespace(request, namespace))?;
        Ok(())
    }

    #[instrument(skip_all, fields(verb, object = %object.qname()))]
    fn submit(&self, verb: &str, object: &ApiObject) -> Result<ApiObject> {
        let request = with_namespace(
            CommandRequest::new(verb)
                .args(["-f", "-", "-o", "json"])
                .stdin(object.to_json_string()),
            object.namespace(),
        );
        self.invoke_json(&request).map(ApiObject::new)
    }
}

pub(crate) fn with_namespace(request: CommandRequest, namespace: Option<&str>) -> CommandRequest {
    match namespace {
        Some(ns) => request.arg(format!("--namespace={ns}")),
        None => request,
    }
}
