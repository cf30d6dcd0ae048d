#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use coffer::{paths::CofferPaths, store::ConfigStore, ChainType};
use eyre::Context as _;
use std::{path::PathBuf, process::ExitCode};
use tracing_subscriber::prelude::*;

mod cli_output;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "coffer", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Create the keyring from a fresh or imported recovery phrase.
    ///
    /// The password is read from `COFFER_PASSWORD`, or prompted for twice.
    Init {
        /// Entropy bits for a generated phrase: 128, 160, 192, 224 or 256.
        #[arg(long)]
        strength: Option<u32>,

        /// Import a phrase from `COFFER_MNEMONIC` (or a prompt) instead of generating one.
        #[arg(long, default_value_t = false)]
        import: bool,
    },

    /// Verify the keyring password without changing anything.
    UnlockCheck,

    /// Derive the next account for a chain. The first account per chain becomes active.
    CreateAccount {
        chain: ChainType,
        #[arg(long)]
        name: Option<String>,
    },

    /// List accounts, optionally for one chain.
    Accounts {
        #[arg(long)]
        chain: Option<ChainType>,
    },

    /// Make an account the active one for its chain.
    UseAccount { id: String },

    RenameAccount { id: String, name: String },

    /// Sign a UTF-8 message with the chain's active account.
    SignMessage { chain: ChainType, message: String },

    /// Sign a hex-encoded transaction payload with the chain's active account.
    SignTx { chain: ChainType, payload: String },

    /// Print the recovery phrase. Requires the keyring password.
    ExportMnemonic,

    /// Write an encrypted backup (phrase and accounts) under `COFFER_BACKUP_PASSWORD`.
    Backup {
        #[arg(long)]
        out: PathBuf,
    },

    /// Replace the keyring with a backup. The restored keyring uses the backup password.
    Restore {
        #[arg(long = "in")]
        input: PathBuf,

        /// Overwrite an existing keyring.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Re-seal the keyring under `COFFER_NEW_PASSWORD`.
    ChangePassword,

    /// Query a configured network's block height through retry and provider failover.
    Probe { network: String },

    /// Seal a short message to an X25519 public key (base64).
    EncryptMessage {
        #[arg(long)]
        public_key: String,
        text: String,
    },
}

fn init_logging(paths: &CofferPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("coffer.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

async fn run(ctx: &commands::Ctx, cmd: Command) -> eyre::Result<serde_json::Value> {
    match cmd {
        Command::Paths => Ok(commands::paths(ctx)),
        Command::Init { strength, import } => commands::init(ctx, strength, import),
        Command::UnlockCheck => commands::unlock_check(ctx),
        Command::CreateAccount { chain, name } => {
            commands::create_account(ctx, chain, name.as_deref())
        }
        Command::Accounts { chain } => commands::accounts(ctx, chain),
        Command::UseAccount { id } => commands::use_account(ctx, &id),
        Command::RenameAccount { id, name } => commands::rename_account(ctx, &id, &name),
        Command::SignMessage { chain, message } => commands::sign_message(ctx, chain, &message),
        Command::SignTx { chain, payload } => commands::sign_tx(ctx, chain, &payload),
        Command::ExportMnemonic => commands::export_mnemonic(ctx),
        Command::Backup { out } => commands::backup(ctx, &out),
        Command::Restore { input, force } => commands::restore(ctx, &input, force),
        Command::ChangePassword => commands::change_password(ctx),
        Command::Probe { network } => commands::probe(ctx, &network).await,
        Command::EncryptMessage { public_key, text } => {
            commands::encrypt_message(&public_key, &text)
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = CofferPaths::discover()?;
    paths.ensure_private_dirs().context("create coffer dirs")?;
    let _log_guard = init_logging(&paths);

    let cfg = ConfigStore::new(&paths)
        .load_or_init_default()
        .context("load config")?;
    let ctx = commands::Ctx::new(paths, cfg);

    match run(&ctx, cli.cmd).await {
        Ok(out) => {
            cli_output::print_json(&out)?;
            let ok = out.get("ok").and_then(serde_json::Value::as_bool) != Some(false);
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Err(e) => {
            let report = cli_output::error_report(&e);
            tracing::error!(code = %report.code, error = %format!("{e:#}"), "command failed");
            cli_output::print_error(&report)?;
            Ok(ExitCode::FAILURE)
        }
    }
}
