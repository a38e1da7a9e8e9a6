//! Client configuration file (TOML).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::RetryPolicy;
use crate::io::context::{
    DEFAULT_BINARY, DEFAULT_OUTPUT_LIMIT_BYTES, DEFAULT_TIMEOUT, ExecutionContext, HostKeyPolicy,
    SshTarget,
};

/// Environment variable naming the config file used by the CLI.
pub const CONFIG_ENV: &str = "KUBESHIM_CONFIG";

/// Client configuration (TOML).
///
/// Missing fields take the same defaults as [`ExecutionContext::default`].
/// The presence of an `[ssh]` table selects the ssh transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KubeshimConfig {
    /// Tool binary (`kubectl`, `oc`), resolved on `PATH` of the executing host.
    pub binary: String,

    /// Kill an invocation after this many seconds.
    pub timeout_secs: u64,

    /// Keep at most this many bytes of stdout/stderr per invocation.
    pub output_limit_bytes: usize,

    /// Submissions allowed per modify-and-apply call.
    pub max_attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    pub insecure_skip_tls_verify: bool,
    pub extra_args: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub forward_agent: bool,
    pub host_key_policy: HostKeyPolicy,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: None,
            port: None,
            forward_agent: false,
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout_secs: 30,
        }
    }
}

impl Default for KubeshimConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            namespace: None,
            kubeconfig: None,
            context: None,
            request_timeout_secs: None,
            insecure_skip_tls_verify: false,
            extra_args: Vec::new(),
            ssh: None,
        }
    }
}

impl KubeshimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(anyhow!("binary must be non-empty"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if let Some(ssh) = &self.ssh {
            if ssh.host.trim().is_empty() {
                return Err(anyhow!("ssh.host must be non-empty"));
            }
            if ssh.connect_timeout_secs == 0 {
                return Err(anyhow!("ssh.connect_timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    pub fn execution_context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::default()
            .with_binary(&self.binary)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_output_limit_bytes(self.output_limit_bytes)
            .with_insecure_skip_tls_verify(self.insecure_skip_tls_verify);
        ctx.namespace.clone_from(&self.namespace);
        ctx.kubeconfig.clone_from(&self.kubeconfig);
        ctx.cluster_context.clone_from(&self.context);
        ctx.request_timeout = self.request_timeout_secs.map(Duration::from_secs);
        ctx.extra_args.clone_from(&self.extra_args);
        if let Some(ssh) = &self.ssh {
            ctx = ctx.with_ssh(ssh.target());
        }
        ctx
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }
}

impl SshConfig {
    pub fn target(&self) -> SshTarget {
        let mut target = SshTarget::new(&self.host)
            .with_forward_agent(self.forward_agent)
            .with_host_key_policy(self.host_key_policy)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        target.user.clone_from(&self.user);
        target.port = self.port;
        target
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `KubeshimConfig::default()`.
pub fn load_config(path: &Path) -> Result<KubeshimConfig> {
    if !path.exists() {
        let cfg = KubeshimConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: KubeshimConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &KubeshimConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
