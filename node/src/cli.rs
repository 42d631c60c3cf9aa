//! # CLI Interface
//!
//! Command-line structure for `ap2-node`, via `clap` derive.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use ap2_protocol::registry::Role;

use crate::logging::LogFormat;

/// Operator tooling for the AP2 mandate chain core.
///
/// Generates signer keys, verifies mandate chains offline, inspects the
/// transaction ledger and expires stale transactions.
#[derive(Parser, Debug)]
#[command(
    name = "ap2-node",
    about = "AP2 mandate chain operator tool",
    version,
    propagate_version = true
)]
pub struct Ap2NodeCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "AP2_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an Ed25519 signer key for a role.
    Keygen(KeygenArgs),
    /// Validate a JSON array of signed mandates against local policy.
    Verify(VerifyArgs),
    /// List ledger records, or print one record's audit log.
    Audit(AuditArgs),
    /// Recover the ledger, expire stale transactions and purge old nonces.
    Sweep(SweepArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Role the key will sign for.
    #[arg(long)]
    pub role: Role,

    /// Directory the key file is written to.
    #[arg(long, short = 'o', default_value = ".")]
    pub out: PathBuf,

    /// Label used for the file name and the trusted-key entry.
    /// Defaults to the role name.
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Protocol configuration (YAML) holding the trusted keys.
    #[arg(long, short = 'c', env = "AP2_CONFIG")]
    pub config: PathBuf,

    /// JSON file containing the chain, root intent first.
    #[arg(long)]
    pub chain: PathBuf,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Ledger data directory.
    #[arg(long, short = 'd', env = "AP2_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Print the full audit log of this transaction.
    #[arg(long)]
    pub tx: Option<String>,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Ledger data directory.
    #[arg(long, short = 'd', env = "AP2_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Protocol configuration (YAML). Defaults apply when omitted.
    #[arg(long, short = 'c', env = "AP2_CONFIG")]
    pub config: Option<PathBuf>,
}
