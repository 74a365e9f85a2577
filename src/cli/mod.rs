//! Command-line interface definitions for the `machina` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `machina` binary.
#[derive(Debug, Parser)]
#[command(
    name = "machina",
    about = "Provision machines through a pluggable driver and bill their usage",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a machine with the configured driver and wait until it runs.
    #[command(
        name = "provision",
        about = "Create a machine with the configured driver and wait until it runs"
    )]
    Provision(ProvisionCommand),
    /// Bill a usage history file against a price list.
    #[command(name = "credit", about = "Bill a usage history file against a price list")]
    Credit(CreditCommand),
}

/// Arguments for the `machina provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Display name for the new machine.
    #[arg(long, default_value = "machina")]
    pub(crate) name: String,
    /// Override the flavor inherited from the default image.
    #[arg(long, value_name = "FLAVOR")]
    pub(crate) flavor: Option<String>,
    /// Leave the machine running instead of destroying it before exit.
    #[arg(long)]
    pub(crate) keep: bool,
}

/// Arguments for the `machina credit` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CreditCommand {
    /// JSON array of usage records (`instance_type`/`type`, `elapsed`/`time`).
    #[arg(long, value_name = "PATH")]
    pub(crate) usage: String,
    /// Provider price-list document; the stub driver's built-in catalog is
    /// used when omitted.
    #[arg(long, value_name = "PATH")]
    pub(crate) catalog: Option<String>,
}
