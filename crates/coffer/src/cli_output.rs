//! Centralised helpers for CLI output. Results go to stdout as one JSON document;
//! human notices and prompts go to stderr.

use coffer::{CofferError, ErrorCategory, ErrorReport};
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use std::io::{IsTerminal as _, Write as _};

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(value).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write output")
}

/// Map a failure to the report printed on stdout. Library errors keep their code; anything
/// else is reported as `internal`.
pub fn error_report(err: &eyre::Report) -> ErrorReport {
    err.chain()
        .find_map(|e| e.downcast_ref::<CofferError>())
        .map_or_else(
            || ErrorReport {
                code: "internal".to_owned(),
                category: ErrorCategory::Internal,
                message: format!("{err:#}"),
                data: serde_json::Value::Null,
            },
            ErrorReport::from,
        )
}

pub fn print_error(report: &ErrorReport) -> eyre::Result<()> {
    print_json(&serde_json::json!({ "ok": false, "error": report }))
}

/// Shown once after a fresh keyring is created.
pub fn print_mnemonic_notice(words: usize) {
    stderr_writeln(&format!(
        "coffer: a new {words}-word recovery phrase was generated. Run `coffer export-mnemonic` and store it offline."
    ));
}

fn env_secret(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| SecretString::new(s.into()))
}

/// Read a secret from `var`, or prompt for it on a terminal.
pub fn read_secret(var: &str, prompt: &str) -> eyre::Result<SecretString> {
    if let Some(s) = env_secret(var) {
        return Ok(s);
    }
    if !std::io::stdin().is_terminal() {
        eyre::bail!("{var} is not set and stdin is not a terminal");
    }
    let s = rpassword::prompt_password(prompt).context("read secret from terminal")?;
    Ok(SecretString::new(s.into()))
}

/// Like [`read_secret`], but a prompted value must be typed twice.
pub fn read_new_secret(var: &str, prompt: &str) -> eyre::Result<SecretString> {
    if let Some(s) = env_secret(var) {
        return Ok(s);
    }
    let first = read_secret(var, prompt)?;
    let again = read_secret(var, "Repeat: ")?;
    if first.expose_secret() != again.expose_secret() {
        eyre::bail!("entries did not match");
    }
    Ok(first)
}
