//! Where and how the cluster tool runs.
//!
//! An [`ExecutionContext`] names the tool binary, the transport (local process
//! or a secure shell to a remote host) and the connection flags passed to every
//! invocation. There is one process-wide default plus a per-thread stack of
//! scoped overrides:
//!
//! ```
//! use kubeshim::ExecutionContext;
//!
//! let staging = ExecutionContext::default().with_namespace("staging");
//! {
//!     let _guard = staging.enter();
//!     assert_eq!(ExecutionContext::current().namespace.as_deref(), Some("staging"));
//! }
//! assert_eq!(ExecutionContext::scope_depth(), 0);
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{LazyLock, RwLock};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BINARY: &str = "kubectl";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 50_000_000;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How ssh treats unknown or changed host keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    #[default]
    Strict,
    AcceptNew,
    /// Skip verification entirely. Lab clusters only.
    Insecure,
}

impl HostKeyPolicy {
    /// Value for `-o StrictHostKeyChecking=`.
    pub fn ssh_option(self) -> &'static str {
        match self {
            HostKeyPolicy::Strict => "yes",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Insecure => "no",
        }
    }
}

/// A remote host reached over ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub forward_agent: bool,
    pub host_key_policy: HostKeyPolicy,
    pub connect_timeout: Duration,
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            forward_agent: false,
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_forward_agent(mut self, forward_agent: bool) -> Self {
        self.forward_agent = forward_agent;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Transport {
    /// Child process on this machine, inheriting environment and cwd.
    #[default]
    Local,
    Ssh(SshTarget),
}

impl Transport {
    /// Short label for logs.
    pub fn label(&self) -> &str {
        match self {
            Transport::Local => "local",
            Transport::Ssh(target) => &target.host,
        }
    }
}

/// Settings applied to every invocation made under this context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub binary: String,
    pub transport: Transport,
    pub namespace: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    /// Named context inside the kubeconfig (`--context`).
    pub cluster_context: Option<String>,
    pub insecure_skip_tls_verify: bool,
    /// Server-side request timeout (`--request-timeout`).
    pub request_timeout: Option<Duration>,
    /// Wall-clock limit for the whole invocation; the child is killed after it.
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub extra_args: Vec<String>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            transport: Transport::Local,
            namespace: None,
            kubeconfig: None,
            cluster_context: None,
            insecure_skip_tls_verify: false,
            request_timeout: None,
            timeout: DEFAULT_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            extra_args: Vec::new(),
        }
    }
}

static DEFAULT: LazyLock<RwLock<ExecutionContext>> =
    LazyLock::new(|| RwLock::new(ExecutionContext::default()));

thread_local! {
    static STACK: RefCell<Vec<ExecutionContext>> = const { RefCell::new(Vec::new()) };
}

impl ExecutionContext {
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_ssh(self, target: SshTarget) -> Self {
        self.with_transport(Transport::Ssh(target))
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn with_cluster_context(mut self, name: impl Into<String>) -> Self {
        self.cluster_context = Some(name.into());
        self
    }

    pub fn with_insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit_bytes(mut self, limit: usize) -> Self {
        self.output_limit_bytes = limit;
        self
    }

    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Flags placed between the binary and the verb.
    pub fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push(format!("--kubeconfig={}", path.display()));
        }
        if let Some(ns) = &self.namespace {
            args.push(format!("--namespace={ns}"));
        }
        if let Some(name) = &self.cluster_context {
            args.push(format!("--context={name}"));
        }
        if self.insecure_skip_tls_verify {
            args.push("--insecure-skip-tls-verify=true".to_string());
        }
        if let Some(timeout) = self.request_timeout {
            args.push(format!("--request-timeout={}s", timeout.as_secs()));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Replace the process-wide default. Scoped overrides still win.
    pub fn set_default(ctx: ExecutionContext) {
        debug!(transport = ctx.transport.label(), "replacing default context");
        match DEFAULT.write() {
            Ok(mut guard) => *guard = ctx,
            Err(poisoned) => *poisoned.into_inner() = ctx,
        }
    }

    pub fn process_default() -> ExecutionContext {
        match DEFAULT.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Innermost scoped context on this thread, or the process default.
    pub fn current() -> ExecutionContext {
        STACK
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(Self::process_default)
    }

    /// Number of scopes currently entered on this thread.
    pub fn scope_depth() -> usize {
        STACK.with(|stack| stack.borrow().len())
    }

    /// Make this context current on this thread until the guard drops.
    pub fn enter(self) -> ContextGuard {
        let depth = STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(self);
            stack.len()
        });
        ContextGuard {
            depth,
            _not_send: PhantomData,
        }
    }

    pub fn scoped<T>(self, f: impl FnOnce() -> T) -> T {
        let _guard = self.enter();
        f()
    }
}

/// Restores the previous context when dropped.
///
/// Guards are tied to the thread that created them.
#[must_use = "the context is only active while the guard is alive"]
pub struct ContextGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        // Truncating (rather than popping) also clears scopes leaked by an
        // inner guard that was forgotten.
        let _ = STACK.try_with(|stack| stack.borrow_mut().truncate(self.depth - 1));
    }
}

/// Spawn a thread that starts inside the caller's current context.
pub fn spawn<F, T>(f: F) -> thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let ctx = ExecutionContext::current();
    thread::spawn(move || ctx.scoped(f))
}
