use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wb_audit::ChainStatus;
use wb_broker::cli::{AuditCommand, Cli, Command, ConfigCommand, CredentialCommand};
use wb_broker::state::BrokerState;
use wb_broker::{cli, server};
use wb_containers::DockerCli;
use wb_domain::config::{ChainBreakBehavior, Config, ConfigSeverity};
use wb_domain::types::Provider;
use wb_keystore::{CredentialFilter, Keystore};

/// Exit codes: 0 normal, 1 fatal config/keystore error, 2 irrecoverable
/// audit integrity error, 64 bad CLI arguments.
const EXIT_FATAL: u8 = 1;
const EXIT_AUDIT_INTEGRITY: u8 = 2;
const EXIT_USAGE: u8 = 64;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            serve().await
        }
        Some(Command::Doctor) => {
            let (config, path) = match cli::load_config() {
                Ok(loaded) => loaded,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::from(EXIT_FATAL);
                }
            };
            if cli::doctor(&config, &path).await {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FATAL)
            }
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            match cli::load_config() {
                Ok((config, path)) => {
                    if cli::validate(&config, &path) {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(EXIT_FATAL)
                    }
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }
        Some(Command::Config(ConfigCommand::Show)) => match cli::load_config() {
            Ok((config, _)) => {
                cli::show(&config);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(EXIT_FATAL)
            }
        },
        Some(Command::Credential(cmd)) => credential_command(cmd),
        Some(Command::Audit(cmd)) => audit_command(cmd),
        Some(Command::Version) => {
            println!("wardbridge {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wb_broker=debug")),
        )
        .json()
        .init();
}

async fn serve() -> ExitCode {
    match run_server().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "broker failed to start");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run_server() -> anyhow::Result<ExitCode> {
    use anyhow::Context;

    tracing::info!("wardbridge starting");

    let (config, _config_path) = cli::load_config()?;

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }
    let config = Arc::new(config);

    // ── Keystore (hardware-bound master key) ─────────────────────────
    let keystore =
        Arc::new(Keystore::open(&config.keystore).context("opening keystore")?);
    tracing::info!("keystore ready");

    // ── Component graph ──────────────────────────────────────────────
    let runtime = Arc::new(DockerCli::new(config.containers.runtime_bin.clone()));
    let state = Arc::new(
        BrokerState::build(config.clone(), runtime, keystore, None)
            .context("building broker state")?,
    );

    // ── Audit chain verification at startup ──────────────────────────
    match state.audit.verify().context("verifying audit chain")? {
        ChainStatus::Intact { entries, .. } => {
            tracing::info!(entries, "audit chain intact");
        }
        ChainStatus::Broken { at_sequence, reason } => {
            tracing::error!(at_sequence, %reason, "audit chain is broken");
            match config.audit.on_chain_break {
                ChainBreakBehavior::Halt => {
                    return Ok(ExitCode::from(EXIT_AUDIT_INTEGRITY));
                }
                ChainBreakBehavior::Degrade => state.audit.mark_degraded(),
            }
        }
    }

    let cancel = CancellationToken::new();

    // ── TTL reaper ───────────────────────────────────────────────────
    state.containers.start();
    tracing::info!(
        idle_timeout_secs = config.containers.idle_timeout_secs,
        check_interval_secs = config.containers.check_interval_secs,
        "TTL reaper started"
    );

    // ── Periodic sweeps (tokens, sessions, devices, voice) ───────────
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let tokens = state.tokens.sweep();
                        let (sessions, requests, devices) = state.zerotrust.sweep();
                        let voice = state.voice.sweep();
                        if tokens + sessions + requests + devices + voice > 0 {
                            tracing::debug!(
                                tokens, sessions, requests, devices, voice,
                                "expiry sweep"
                            );
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    // ── Daily audit retention ────────────────────────────────────────
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
            interval.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match state.audit.apply_retention(chrono::Utc::now()) {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(dropped = n, "audit retention applied"),
                            Err(e) => tracing::error!(error = %e, "audit retention failed"),
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    // ── Matrix sync loop + inbox pump ────────────────────────────────
    if let Some(adapter) = &state.matrix {
        let mut receiver = adapter.start();
        let inbox = state.inbox.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = receiver.recv() => match event {
                        Some(event) => inbox.write().push(event),
                        None => return,
                    },
                    _ = cancel.cancelled() => return,
                }
            }
        });
        tracing::info!("matrix sync loop started");
    }

    // ── Shutdown signal ──────────────────────────────────────────────
    {
        let cancel = cancel.clone();
        let state = state.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                if let Some(adapter) = &state.matrix {
                    adapter.stop();
                }
                state.containers.stop();
                cancel.cancel();
            }
        });
    }

    server::run(state, cancel).await?;
    Ok(ExitCode::SUCCESS)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keystore / audit subcommands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn open_keystore() -> Result<Keystore, ExitCode> {
    let (config, _) = cli::load_config().map_err(|e| {
        eprintln!("{e}");
        ExitCode::from(EXIT_FATAL)
    })?;
    Keystore::open(&config.keystore).map_err(|e| {
        eprintln!("keystore: {e}");
        ExitCode::from(EXIT_FATAL)
    })
}

fn credential_command(cmd: CredentialCommand) -> ExitCode {
    let keystore = match open_keystore() {
        Ok(keystore) => keystore,
        Err(code) => return code,
    };

    match cmd {
        CredentialCommand::Add { id, provider, name } => {
            let provider: Provider = match provider.parse() {
                Ok(provider) => provider,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::from(EXIT_USAGE);
                }
            };
            // The secret comes from the terminal, never from argv.
            let value = match rpassword::prompt_password("Secret value: ") {
                Ok(value) if !value.is_empty() => value,
                Ok(_) => {
                    eprintln!("empty secret");
                    return ExitCode::from(EXIT_USAGE);
                }
                Err(e) => {
                    eprintln!("reading secret: {e}");
                    return ExitCode::from(EXIT_FATAL);
                }
            };
            let display = name.unwrap_or_else(|| id.clone());
            match keystore.store_credential(&id, provider, &display, vec![], None, &value) {
                Ok(cred) => {
                    println!("stored {} ({})", cred.id, cred.provider);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }
        CredentialCommand::List => {
            let credentials = keystore.list_credentials(&CredentialFilter {
                include_expired: true,
                ..Default::default()
            });
            if credentials.is_empty() {
                println!("no credentials stored");
            }
            for cred in credentials {
                println!(
                    "{}  provider={}  created={}  last_used={}",
                    cred.id,
                    cred.provider,
                    cred.created_at.format("%Y-%m-%d"),
                    cred.last_used_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".into()),
                );
            }
            ExitCode::SUCCESS
        }
        CredentialCommand::Remove { id } => match keystore.delete_credential(&id) {
            Ok(()) => {
                println!("removed {id}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(EXIT_FATAL)
            }
        },
    }
}

fn audit_command(cmd: AuditCommand) -> ExitCode {
    let (config, _) = match cli::load_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    let log = match wb_audit::AuditLog::open(&config.audit) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("audit: {e}");
            return ExitCode::from(EXIT_AUDIT_INTEGRITY);
        }
    };

    match cmd {
        AuditCommand::Verify => match log.verify() {
            Ok(ChainStatus::Intact { entries, tip_hash }) => {
                println!("chain intact: {entries} entries, tip {tip_hash}");
                ExitCode::SUCCESS
            }
            Ok(ChainStatus::Broken { at_sequence, reason }) => {
                eprintln!("chain BROKEN at entry {at_sequence}: {reason}");
                ExitCode::from(EXIT_AUDIT_INTEGRITY)
            }
            Err(e) => {
                eprintln!("verify failed: {e}");
                ExitCode::from(EXIT_AUDIT_INTEGRITY)
            }
        },
        AuditCommand::Export { format } => {
            let format = match format.as_str() {
                "json" => wb_audit::ExportFormat::Json,
                "csv" => wb_audit::ExportFormat::Csv,
                other => {
                    eprintln!("unknown format '{other}' (json|csv)");
                    return ExitCode::from(EXIT_USAGE);
                }
            };
            match log.export(None, None, format) {
                Ok(body) => {
                    println!("{body}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::from(EXIT_AUDIT_INTEGRITY)
                }
            }
        }
    }
}
