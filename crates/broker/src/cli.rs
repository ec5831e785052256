//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use wb_domain::config::{Config, ConfigSeverity};

/// wardbridge — local trust broker for untrusted agents.
#[derive(Debug, Parser)]
#[command(name = "wardbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the broker (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Credential keystore utilities.
    #[command(subcommand)]
    Credential(CredentialCommand),
    /// Audit log utilities.
    #[command(subcommand)]
    Audit(AuditCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum CredentialCommand {
    /// Store a credential; the secret is prompted, never an argument.
    Add {
        /// Credential id (e.g. "openai-key-1").
        id: String,
        /// Provider tag (openai, anthropic, openrouter, google, xai, custom).
        #[arg(long)]
        provider: String,
        /// Display name (defaults to the id).
        #[arg(long)]
        name: Option<String>,
    },
    /// List credential metadata.
    List,
    /// Delete a credential.
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
pub enum AuditCommand {
    /// Walk the chain and report the first break, if any.
    Verify,
    /// Export entries as JSON or CSV to stdout.
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `WB_CONFIG` (or
/// `wardbridge.toml` by default). Returns the parsed [`Config`] and the
/// path that was used.
pub fn load_config() -> anyhow::Result<(Config, PathBuf)> {
    let config_path =
        PathBuf::from(std::env::var("WB_CONFIG").unwrap_or_else(|_| "wardbridge.toml".into()));
    let config = Config::load(&config_path)
        .map_err(|e| anyhow::anyhow!("loading {}: {e}", config_path.display()))?;
    Ok((config, config_path))
}

/// Print validation results; true when no errors.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// Dump the resolved config as TOML with secrets elided.
pub fn show(config: &Config) {
    let mut shown = config.clone();
    if !shown.matrix.access_token.is_empty() {
        shown.matrix.access_token = "<set>".into();
    }
    if !shown.matrix.refresh_token.is_empty() {
        shown.matrix.refresh_token = "<set>".into();
    }
    if !shown.voice.turn_secret.is_empty() {
        shown.voice.turn_secret = "<set>".into();
    }
    if !shown.license.key.is_empty() {
        shown.license.key = "<set>".into();
    }
    match toml::to_string_pretty(&shown) {
        Ok(raw) => println!("{raw}"),
        Err(e) => println!("failed to render config: {e}"),
    }
}

/// Environment diagnostics: config issues, directory access, machine
/// identity, container runtime presence. Returns true when healthy.
pub async fn doctor(config: &Config, path: &std::path::Path) -> bool {
    let mut healthy = true;

    println!("config file: {}", path.display());
    for issue in config.validate() {
        println!("  {issue}");
        if issue.severity == ConfigSeverity::Error {
            healthy = false;
        }
    }

    match wb_keystore::MachineIdentity::collect() {
        Ok(_) => println!("machine identity: ok"),
        Err(e) => {
            println!("machine identity: FAILED ({e})");
            healthy = false;
        }
    }

    for (label, dir) in [
        ("keystore dir", PathBuf::from(&config.keystore.path)),
        ("audit dir", PathBuf::from(&config.audit.path)),
        ("secret socket dir", PathBuf::from(&config.inject.socket_dir)),
    ] {
        let parent = dir.parent().unwrap_or(&dir);
        if parent.exists() || std::fs::create_dir_all(parent).is_ok() {
            println!("{label}: ok ({})", parent.display());
        } else {
            println!("{label}: UNWRITABLE ({})", parent.display());
            healthy = false;
        }
    }

    let runtime = &config.containers.runtime_bin;
    match tokio::process::Command::new(runtime)
        .arg("--version")
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            println!(
                "container runtime: ok ({})",
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }
        _ => {
            println!("container runtime: '{runtime}' not runnable");
            healthy = false;
        }
    }

    if config.containers.allowed_digests.is_empty() {
        println!("image policy: WARNING: no digests allow-listed, creation will be refused");
    } else {
        println!(
            "image policy: {} digest(s) allow-listed",
            config.containers.allowed_digests.len()
        );
    }

    println!(
        "{}",
        if healthy {
            "doctor: healthy"
        } else {
            "doctor: problems found"
        }
    );
    healthy
}
