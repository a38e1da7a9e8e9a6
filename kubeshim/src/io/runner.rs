//! Runner abstraction for tool invocation.
//!
//! The [`CommandRunner`] trait decouples the client from how the tool is
//! actually launched. [`ProcessRunner`] spawns it locally or through ssh;
//! tests use the in-memory runners from `test_support`.

use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::core::classifier::{is_transport_failure, remote_launch_failure};
use crate::core::types::InvocationResult;
use crate::error::{Error, Result};
use crate::io::context::{ExecutionContext, HostKeyPolicy, SshTarget, Transport};
use crate::io::process::run_command_with_timeout;

/// One tool invocation: the verb, its arguments and an optional stdin payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandRequest {
    pub verb: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandRequest {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// `verb args...` for logs and error messages.
    pub fn render(&self) -> String {
        std::iter::once(self.verb.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Abstraction over invocation backends.
///
/// A non-zero exit is returned as data. Implementations fail only when the
/// tool could not be run at all (launch, transport, timeout) or its output
/// did not fit the capture limit.
pub trait CommandRunner: Send + Sync {
    fn run(&self, ctx: &ExecutionContext, request: &CommandRequest) -> Result<InvocationResult>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    fn run(&self, ctx: &ExecutionContext, request: &CommandRequest) -> Result<InvocationResult> {
        (**self).run(ctx, request)
    }
}

/// `[binary, global flags..., verb, args...]`.
pub fn build_argv(ctx: &ExecutionContext, request: &CommandRequest) -> Vec<String> {
    let mut argv = Vec::with_capacity(2 + request.args.len());
    argv.push(ctx.binary.clone());
    argv.extend(ctx.global_args());
    argv.push(request.verb.clone());
    argv.extend(request.args.iter().cloned());
    argv
}

/// Wrap a tool argv in an ssh invocation. The remote side gets one
/// shell-quoted command string.
pub fn ssh_argv(target: &SshTarget, remote: &[String]) -> Vec<String> {
    let mut argv: Vec<String> = vec![
        "ssh".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)),
        "-o".into(),
        format!(
            "StrictHostKeyChecking={}",
            target.host_key_policy.ssh_option()
        ),
    ];
    if target.host_key_policy == HostKeyPolicy::Insecure {
        argv.push("-o".into());
        argv.push("UserKnownHostsFile=/dev/null".into());
    }
    argv.push(if target.forward_agent { "-A" } else { "-a" }.into());
    if let Some(port) = target.port {
        argv.push("-p".into());
        argv.push(port.to_string());
    }
    if let Some(user) = &target.user {
        argv.push("-l".into());
        argv.push(user.clone());
    }
    argv.push(target.host.clone());
    argv.push("--".into());
    argv.push(
        remote
            .iter()
            .map(|arg| shell_escape::unix::escape(arg.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" "),
    );
    argv
}

/// Separate ssh and remote-shell failures from the tool's own exit status.
pub(crate) fn check_ssh_exit(
    target: &SshTarget,
    binary: &str,
    status: i32,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<()> {
    let stderr = String::from_utf8_lossy(stderr);
    if is_transport_failure(status, stdout, &stderr) {
        warn!(host = %target.host, status, "ssh transport failed");
        return Err(Error::Transport {
            host: target.host.clone(),
            message: stderr.trim().to_string(),
        });
    }
    if let Some(kind) = remote_launch_failure(status) {
        warn!(host = %target.host, status, binary, "remote shell could not run the tool");
        return Err(Error::Launch {
            program: format!("{}:{binary}", target.host),
            source: std::io::Error::new(kind, stderr.trim().to_string()),
        });
    }
    Ok(())
}

/// Runner that spawns the tool as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(verb = %request.verb, transport = ctx.transport.label()))]
    fn run(&self, ctx: &ExecutionContext, request: &CommandRequest) -> Result<InvocationResult> {
        let tool_argv = build_argv(ctx, request);
        let command = tool_argv.join(" ");
        let argv = match &ctx.transport {
            Transport::Local => tool_argv,
            Transport::Ssh(target) => ssh_argv(target, &tool_argv),
        };
        let Some((program, rest)) = argv.split_first() else {
            return Err(Error::io(
                "empty argument vector",
                std::io::ErrorKind::InvalidInput.into(),
            ));
        };

        let mut cmd = Command::new(program);
        cmd.args(rest);

        debug!(%command, "invoking");
        let started = Instant::now();
        let output = run_command_with_timeout(
            cmd,
            program,
            request.stdin.as_deref(),
            ctx.timeout,
            ctx.output_limit_bytes,
        )?;
        let elapsed = started.elapsed();

        if output.timed_out {
            warn!(%command, timeout_secs = ctx.timeout.as_secs(), "invocation timed out");
            return Err(Error::Timeout {
                command,
                after: ctx.timeout,
            });
        }

        let truncated = [
            ("stdout", output.stdout_truncated),
            ("stderr", output.stderr_truncated),
        ];
        if let Some((stream, dropped)) = truncated.into_iter().find(|(_, n)| *n > 0) {
            warn!(%command, stream, dropped, limit = ctx.output_limit_bytes, "output limit exceeded");
            return Err(Error::OutputTruncated {
                command,
                stream,
                limit: ctx.output_limit_bytes,
            });
        }

        let status = output.status.code().unwrap_or(-1);
        if let Transport::Ssh(target) = &ctx.transport {
            check_ssh_exit(target, &ctx.binary, status, &output.stdout, &output.stderr)?;
        }

        if status == 0 {
            debug!(%command, elapsed_ms = elapsed.as_millis() as u64, "invocation finished");
        } else {
            warn!(%command, status, elapsed_ms = elapsed.as_millis() as u64, "invocation exited non-zero");
        }

        Ok(InvocationResult {
            command,
            status,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn argv_places_global_flags_before_verb() {
        let ctx = ExecutionContext::default()
            .with_binary("oc")
            .with_namespace("web");
        let request = CommandRequest::new("get").args(["pods", "-o", "json"]);
        assert_eq!(
            build_argv(&ctx, &request),
            vec!["oc", "--namespace=web", "get", "pods", "-o", "json"]
        );
        assert_eq!(request.render(), "get pods -o json");
    }

    #[test]
    fn ssh_argv_quotes_remote_command() {
        let target = SshTarget::new("bastion")
            .with_user("ops")
            .with_port(2222)
            .with_forward_agent(true)
            .with_host_key_policy(HostKeyPolicy::AcceptNew)
            .with_connect_timeout(Duration::from_secs(15));
        let remote = vec![
            "kubectl".to_string(),
            "label".to_string(),
            "pod/a".to_string(),
            "note=hello world".to_string(),
            "quote='x'".to_string(),
        ];
        let argv = ssh_argv(&target, &remote);
        assert_eq!(
            argv,
            vec![
                "ssh",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=15",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-A",
                "-p",
                "2222",
                "-l",
                "ops",
                "bastion",
                "--",
                r#"kubectl label pod/a 'note=hello world' 'quote='\''x'\'''"#,
            ]
        );
    }

    #[test]
    fn insecure_policy_discards_known_hosts() {
        let target = SshTarget::new("lab").with_host_key_policy(HostKeyPolicy::Insecure);
        let argv = ssh_argv(&target, &["kubectl".to_string()]);
        assert!(argv.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert!(argv.contains(&"-a".to_string()));
        assert_eq!(argv.last().map(String::as_str), Some("kubectl"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_data() {
        let ctx = ExecutionContext::default().with_binary("sh");
        let request = CommandRequest::new("-c").arg("echo nope >&2; exit 1");
        let result = ProcessRunner.run(&ctx, &request).expect("run");
        assert_eq!(result.status, 1);
        assert_eq!(result.stderr_text(), "nope\n");
        assert_eq!(result.command, "sh -c echo nope >&2; exit 1");
    }

    #[cfg(unix)]
    #[test]
    fn stdin_payload_reaches_the_tool() {
        let ctx = ExecutionContext::default().with_binary("sh");
        let request = CommandRequest::new("-c").arg("cat").stdin("{}");
        let result = ProcessRunner.run(&ctx, &request).expect("run");
        assert!(result.success());
        assert_eq!(result.stdout, b"{}");
    }

    #[cfg(unix)]
    #[test]
    fn slow_tool_times_out() {
        let ctx = ExecutionContext::default()
            .with_binary("sh")
            .with_timeout(Duration::from_millis(100));
        let request = CommandRequest::new("-c").arg("sleep 5");
        let err = ProcessRunner.run(&ctx, &request).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn output_over_limit_is_an_error() {
        let ctx = ExecutionContext::default()
            .with_binary("sh")
            .with_output_limit_bytes(19);
        let request = CommandRequest::new("-c").arg("printf 'pod/web-1\\npod/web-10\\n'");
        let err = ProcessRunner.run(&ctx, &request).unwrap_err();
        assert!(
            matches!(err, Error::OutputTruncated { stream: "stdout", limit: 19, .. }),
            "got {err:?}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn output_at_limit_is_kept_whole() {
        let ctx = ExecutionContext::default()
            .with_binary("sh")
            .with_output_limit_bytes(21);
        let request = CommandRequest::new("-c").arg("printf 'pod/web-1\\npod/web-10\\n'");
        let result = ProcessRunner.run(&ctx, &request).expect("run");
        assert_eq!(result.stdout_text(), "pod/web-1\npod/web-10\n");
    }

    #[test]
    fn remote_shell_without_the_tool_is_a_launch_failure() {
        let target = SshTarget::new("bastion");
        let err = check_ssh_exit(
            &target,
            "kubectl",
            127,
            b"",
            b"bash: line 1: kubectl: command not found\n",
        )
        .unwrap_err();
        assert!(
            matches!(&err, Error::Launch { program, source }
                if program == "bastion:kubectl" && source.kind() == std::io::ErrorKind::NotFound),
            "got {err:?}"
        );
    }

    #[test]
    fn tool_exit_over_ssh_is_data() {
        let target = SshTarget::new("bastion");
        let stderr = b"Error from server (NotFound): pods \"web-0\" not found\n";
        assert!(check_ssh_exit(&target, "kubectl", 1, b"", stderr).is_ok());
        assert!(check_ssh_exit(&target, "kubectl", 0, b"pod/a\n", b"").is_ok());
    }

    #[test]
    fn missing_binary_fails_to_launch() {
        let ctx = ExecutionContext::default().with_binary("kubeshim-no-such-tool");
        let err = ProcessRunner
            .run(&ctx, &CommandRequest::new("get"))
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }), "got {err:?}");
    }
}
