//! Diagnostic command-line front end for the kubeshim library.
//!
//! Every subcommand maps onto one library operation so selector resolution,
//! bulk verbs and modify-and-apply can be exercised against a live cluster.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use kubeshim::exit_codes;
use kubeshim::io::config::{CONFIG_ENV, load_config};
use kubeshim::{ApplyOutcome, Client, Node, Path, ResourceRef, Selector, SshTarget, Transport};

#[derive(Parser)]
#[command(
    name = "kubeshim",
    version,
    about = "Selectors, structured objects and conflict-retrying updates over kubectl"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Configuration file (TOML). Defaults apply when absent.
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Namespace for every invocation.
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Run the tool on this host over ssh.
    #[arg(long, global = true)]
    ssh_host: Option<String>,

    /// Label selector applied to kind targets (`app=web,!legacy`).
    #[arg(short = 'l', long = "selector", global = true)]
    selector: Option<String>,

    /// Field selector applied to kind targets.
    #[arg(long, global = true)]
    field_selector: Option<String>,

    /// Query kind targets across all namespaces.
    #[arg(short = 'A', long, global = true)]
    all_namespaces: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print qualified names of matching resources.
    Names { targets: Vec<String> },
    /// Print how many matching resources exist.
    Count { targets: Vec<String> },
    /// Print matching objects as JSON.
    Get {
        targets: Vec<String>,
        /// Print only the value at this path of each object.
        #[arg(long)]
        path: Option<String>,
    },
    /// Set (`k=v`) or remove (`k-`) labels on every match.
    Label {
        #[arg(required = true)]
        args: Vec<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Set (`k=v`) or remove (`k-`) annotations on every match.
    Annotate {
        #[arg(required = true)]
        args: Vec<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Delete every match.
    Delete {
        targets: Vec<String>,
        #[arg(long)]
        ignore_not_found: bool,
    },
    /// Set a JSON value at a path of one object, retrying on conflict.
    Set {
        target: String,
        path: String,
        value: String,
    },
}

fn main() {
    kubeshim::logging::init();
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            err.downcast_ref::<kubeshim::Error>()
                .map_or(exit_codes::ERROR, exit_codes::for_error)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let client = build_client(&cli.global)?;
    match cli.command {
        Command::Names { targets } => {
            for name in build_selector(&client, &cli.global, &targets)?.names()? {
                println!("{name}");
            }
            Ok(exit_codes::OK)
        }
        Command::Count { targets } => {
            let count = build_selector(&client, &cli.global, &targets)?.count_existing()?;
            println!("{count}");
            Ok(exit_codes::OK)
        }
        Command::Get { targets, path } => cmd_get(&client, &cli.global, &targets, path.as_deref()),
        Command::Label { args, overwrite } => {
            let (targets, changes) = split_changes(&args)?;
            let outcome =
                build_selector(&client, &cli.global, &targets)?.label(&changes, overwrite)?;
            print_lines(&outcome.succeeded, "labeled");
            Ok(exit_codes::OK)
        }
        Command::Annotate { args, overwrite } => {
            let (targets, changes) = split_changes(&args)?;
            let outcome =
                build_selector(&client, &cli.global, &targets)?.annotate(&changes, overwrite)?;
            print_lines(&outcome.succeeded, "annotated");
            Ok(exit_codes::OK)
        }
        Command::Delete {
            targets,
            ignore_not_found,
        } => {
            let outcome = build_selector(&client, &cli.global, &targets)?.delete(ignore_not_found)?;
            print_lines(&outcome.succeeded, "deleted");
            Ok(exit_codes::OK)
        }
        Command::Set {
            target,
            path,
            value,
        } => cmd_set(&client, &target, &path, &value),
    }
}

fn build_client(global: &GlobalArgs) -> Result<Client> {
    let cfg = match &global.config {
        Some(path) => load_config(path)?,
        None => Default::default(),
    };
    let mut ctx = cfg.execution_context();
    if let Some(ns) = &global.namespace {
        ctx = ctx.with_namespace(ns);
    }
    if let Some(host) = &global.ssh_host {
        let target = match ctx.transport {
            Transport::Ssh(ref configured) => SshTarget {
                host: host.clone(),
                ..configured.clone()
            },
            Transport::Local => SshTarget::new(host),
        };
        ctx = ctx.with_ssh(target);
    }
    Ok(Client::new()
        .pinned(ctx)
        .with_retry_policy(cfg.retry_policy()))
}

fn build_selector(client: &Client, global: &GlobalArgs, targets: &[String]) -> Result<Selector> {
    if targets.is_empty() {
        bail!("at least one target is required");
    }
    let mut selector = client
        .selector(&targets.join(","))
        .context("parse targets")?;
    if let Some(expr) = &global.selector {
        selector = selector.label_selector(expr);
    }
    if let Some(expr) = &global.field_selector {
        selector = selector.field_selector(expr);
    }
    if global.all_namespaces {
        selector = selector.all_namespaces();
    }
    Ok(selector)
}

/// Split `pod/a pod/b app=web legacy-` into targets and label changes.
fn split_changes(args: &[String]) -> Result<(Vec<String>, Vec<(String, Option<String>)>)> {
    let mut targets = Vec::new();
    let mut changes = Vec::new();
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            changes.push((key.to_string(), Some(value.to_string())));
        } else if let Some(key) = arg.strip_suffix('-') {
            changes.push((key.to_string(), None));
        } else if changes.is_empty() {
            targets.push(arg.clone());
        } else {
            bail!("target `{arg}` must come before the changes");
        }
    }
    if changes.is_empty() {
        bail!("no changes given (expected `key=value` or `key-`)");
    }
    Ok((targets, changes))
}

fn cmd_get(
    client: &Client,
    global: &GlobalArgs,
    targets: &[String],
    path: Option<&str>,
) -> Result<i32> {
    let path = path
        .map(Path::parse)
        .transpose()
        .context("parse --path")?;
    let selector = build_selector(client, global, targets)?;
    let objects = selector.objects()?;
    for object in &objects {
        match &path {
            Some(path) => println!("{}", object.model().get_path(path).to_json_string()),
            None => println!("{}", object.model().to_json_pretty()),
        }
    }

    if selector.is_static() {
        let found: Vec<String> = objects.iter().map(|o| o.qname()).collect();
        let missing: Vec<String> = selector
            .names()?
            .into_iter()
            .filter(|name| {
                ResourceRef::parse(name).is_ok_and(|wanted| {
                    !objects.iter().any(|o| {
                        o.is_kind(wanted.kind()) && o.name() == wanted.name()
                    })
                })
            })
            .collect();
        if !missing.is_empty() {
            eprintln!("not found: {} (found: {})", missing.join(", "), found.len());
            return Ok(exit_codes::NOT_FOUND);
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_set(client: &Client, target: &str, path: &str, value: &str) -> Result<i32> {
    let reference = ResourceRef::parse(target).context("parse target")?;
    if !reference.is_named() {
        bail!("`set` needs a single `kind/name`, got `{target}`");
    }
    let path = Path::parse(path).context("parse path")?;
    // Anything that is not valid JSON is taken as a bare string.
    let value = Node::from_json_str(value).unwrap_or_else(|_| Node::from(value));

    let mut object = client.get(&reference)?;
    let outcome = object.modify_and_apply(client, |obj| {
        if obj.model().get_path(&path) == &value {
            return false;
        }
        obj.model_mut().set(path.segments(), value.clone());
        true
    })?;

    match outcome {
        ApplyOutcome::Unchanged => println!("{} unchanged", object.qname()),
        ApplyOutcome::Applied { attempts } => {
            println!("{} updated (attempts: {attempts})", object.qname());
        }
    }
    Ok(exit_codes::OK)
}

fn print_lines(names: &[String], past: &str) {
    for name in names {
        println!("{name} {past}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names_with_globals() {
        let cli = Cli::try_parse_from(["kubeshim", "-n", "web", "names", "pods", "-l", "app=web"])
            .expect("parse");
        assert_eq!(cli.global.namespace.as_deref(), Some("web"));
        assert_eq!(cli.global.selector.as_deref(), Some("app=web"));
        assert!(matches!(cli.command, Command::Names { ref targets } if targets == &["pods"]));
    }

    #[test]
    fn parse_set() {
        let cli = Cli::try_parse_from(["kubeshim", "set", "cm/cfg", "data.mode", "\"on\""])
            .expect("parse");
        assert!(matches!(cli.command, Command::Set { .. }));
    }

    #[test]
    fn label_requires_args() {
        assert!(Cli::try_parse_from(["kubeshim", "label"]).is_err());
    }

    #[test]
    fn split_changes_separates_targets() {
        let args: Vec<String> = ["pod/a", "pod/b", "app=web", "legacy-"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let (targets, changes) = split_changes(&args).expect("split");
        assert_eq!(targets, vec!["pod/a", "pod/b"]);
        assert_eq!(
            changes,
            vec![
                ("app".to_string(), Some("web".to_string())),
                ("legacy".to_string(), None)
            ]
        );
    }

    #[test]
    fn split_changes_rejects_missing_changes() {
        let args = vec!["pod/a".to_string()];
        assert!(split_changes(&args).is_err());
    }
}
