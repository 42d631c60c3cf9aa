// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # AP2 Node
//!
//! Entry point for the `ap2-node` operator binary. Parses CLI arguments,
//! initializes logging, and runs one subcommand:
//!
//! - `keygen`  — generate a signer key for a role
//! - `verify`  — validate a mandate chain offline
//! - `audit`   — inspect ledger records and their audit logs
//! - `sweep`   — recover the ledger and expire stale transactions
//! - `version` — print build version information

mod cli;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::Arc;

use ap2_protocol::config::{ProtocolConfig, TrustedKeyConfig, PROTOCOL_VERSION};
use ap2_protocol::crypto::keys::SignerKeypair;
use ap2_protocol::mandate::SignedMandate;
use ap2_protocol::registry::{roles, KeyDirectory, RoleRegistry};
use ap2_protocol::storage::LedgerDb;
use ap2_protocol::transaction::{TransactionEngine, TransactionId, TransactionRecord};
use ap2_protocol::validation::{MandateChainValidator, ReplayGuard, SystemClock, ValidationResult};

use cli::{Ap2NodeCli, Commands};

/// Subdirectory of `--data-dir` holding the sled ledger.
const LEDGER_DIR: &str = "ledger";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Ap2NodeCli::parse();
    logging::init_logging("ap2_node=info,ap2_protocol=warn", cli.log_format);

    match cli.command {
        Commands::Keygen(args) => keygen(args),
        Commands::Verify(args) => verify(args),
        Commands::Audit(args) => audit(args),
        Commands::Sweep(args) => sweep(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Validator over the configured roles and trusted keys, with a fresh
/// replay set and the system clock.
fn build_validator(config: &ProtocolConfig) -> Result<MandateChainValidator> {
    let registry = roles::install(RoleRegistry::from_config(&config.roles))
        .context("failed to install role registry")?;
    let keys = KeyDirectory::from_config(&config.trusted_keys).context("invalid trusted keys")?;
    tracing::info!(trusted_keys = keys.len(), "key directory loaded");
    Ok(MandateChainValidator::new(
        registry,
        Arc::new(keys),
        Arc::new(ReplayGuard::new(config.replay_retention_grace())),
        Arc::new(SystemClock),
    )
    .with_clock_skew(config.clock_skew()))
}

fn load_config(path: Option<&Path>) -> Result<ProtocolConfig> {
    match path {
        Some(p) => ProtocolConfig::load(p)
            .with_context(|| format!("failed to load config from {}", p.display())),
        None => Ok(ProtocolConfig::default()),
    }
}

fn open_ledger(data_dir: &Path) -> Result<LedgerDb> {
    let path = data_dir.join(LEDGER_DIR);
    let db = LedgerDb::open(&path)
        .with_context(|| format!("failed to open ledger at {}", path.display()))?;
    tracing::info!(path = %path.display(), records = db.record_count(), "ledger opened");
    Ok(db)
}

// ---------------------------------------------------------------------------
// keygen
// ---------------------------------------------------------------------------

fn keygen(args: cli::KeygenArgs) -> Result<()> {
    let label = args.label.unwrap_or_else(|| args.role.as_str().to_string());
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let keypair = SignerKeypair::generate();
    let key_path = args.out.join(format!("{label}.key"));
    write_key_file(&key_path, &keypair.to_hex())?;

    let public_key = keypair.public_key().to_hex();
    tracing::info!(
        role = %args.role,
        identity = %keypair.identity(),
        key_path = %key_path.display(),
        "signer key generated"
    );

    let entry = vec![TrustedKeyConfig {
        label,
        role: args.role,
        public_key: public_key.clone(),
    }];
    println!("Signer key generated.");
    println!("  Role       : {}", args.role);
    println!("  Identity   : {}", keypair.identity());
    println!("  Public key : {public_key}");
    println!("  Key file   : {}", key_path.display());
    println!();
    println!("trusted_keys:");
    print!("{}", serde_yaml::to_string(&entry)?);
    Ok(())
}

/// Create `path` owner-readable only and write the secret into it. Never
/// replaces an existing file.
fn write_key_file(path: &Path, secret_hex: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            bail!("refusing to overwrite existing key {}", path.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create {}", path.display()))
        }
    };
    file.write_all(secret_hex.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write key to {}", path.display()))
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

fn verify(args: cli::VerifyArgs) -> Result<()> {
    let config = load_config(Some(args.config.as_path()))?;
    let validator = build_validator(&config)?;

    let text = std::fs::read_to_string(&args.chain)
        .with_context(|| format!("failed to read {}", args.chain.display()))?;
    let chain: Vec<SignedMandate> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of signed mandates", args.chain.display()))?;

    let verdict = validator.validate(&chain);
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    match verdict {
        ValidationResult::Accepted => Ok(()),
        ValidationResult::Rejected { reason, .. } => bail!("chain rejected: {reason}"),
    }
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RecordSummary {
    id: String,
    state: String,
    created_at: chrono::DateTime<chrono::Utc>,
    mandates: usize,
    audit_entries: usize,
    rejections: u32,
    halted: bool,
}

impl From<&TransactionRecord> for RecordSummary {
    fn from(r: &TransactionRecord) -> Self {
        Self {
            id: r.id().to_string(),
            state: r.state().to_string(),
            created_at: r.created_at(),
            mandates: r.arena().len(),
            audit_entries: r.audit_log().len(),
            rejections: r.rejection_count(),
            halted: r.is_halted(),
        }
    }
}

fn audit(args: cli::AuditArgs) -> Result<()> {
    let db = open_ledger(&args.data_dir)?;

    let Some(tx) = args.tx else {
        for record in db.all_records()? {
            println!("{}", serde_json::to_string(&RecordSummary::from(&record))?);
        }
        return Ok(());
    };

    let id = TransactionId::parse(&tx).with_context(|| format!("invalid transaction id {tx}"))?;
    let mut record = db.require_record(&id)?;
    println!("{}", serde_json::to_string_pretty(&RecordSummary::from(&record))?);
    for e in record.audit_log().entries() {
        println!(
            "{:>4}  {}  {:<17} {:>17} -> {:<17} {:<28} {}  {}",
            e.seq,
            e.timestamp.to_rfc3339(),
            e.transition,
            e.from,
            e.to,
            format!("{:?}", e.outcome),
            e.mandate_id.as_ref().map(|m| m.as_str()).unwrap_or("-"),
            e.reason.as_deref().unwrap_or(""),
        );
    }
    match record.verify_integrity() {
        Ok(()) => println!("integrity: ok ({})", record.state()),
        Err(e) => {
            println!("integrity: FAILED ({e})");
            bail!("audit log of {id} does not verify");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// sweep
// ---------------------------------------------------------------------------

async fn sweep(args: cli::SweepArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let validator = build_validator(&config)?;
    let db = open_ledger(&args.data_dir)?;

    let (engine, recovered) = TransactionEngine::recover(validator, db.clone(), config.max_rejections)
        .await
        .context("recovery failed")?;
    let tick = engine.tick().await;
    engine.shutdown().await;
    db.flush()?;

    println!("live         : {}", recovered.live);
    println!("terminal     : {}", recovered.terminal);
    println!("halted       : {}", recovered.halted.len());
    for id in &recovered.halted {
        println!("  {id}");
    }
    println!("expired now  : {}", tick.expired.len());
    for id in &tick.expired {
        println!("  {id}");
    }
    println!("nonces purged: {}", tick.purged_nonces);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("ap2-node  {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {PROTOCOL_VERSION}");
    println!("rustc     {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merchant.key");

        write_key_file(&path, "00ff").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "00ff");

        let err = write_key_file(&path, "11ee").unwrap_err();
        assert!(err.to_string().contains("refusing to overwrite"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "00ff");
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.key");
        write_key_file(&path, "00ff").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
