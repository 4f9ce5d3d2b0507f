use clap::{Parser, Subcommand};

/// X12 healthcare EDI toolkit: parse 837 claims, generate 835 remittances,
/// check coverage over 270/271.
#[derive(Parser)]
#[command(name = "edix12", version)]
pub struct Cli {
    /// Enable per-transaction event logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Interchange sender id (ISA06/GS02)
    #[arg(long, default_value = "CLINIC", global = true)]
    pub sender: String,

    /// Interchange receiver id (ISA08/GS03)
    #[arg(long, default_value = "PAYER", global = true)]
    pub receiver: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse a file of 837 interchanges, one per line
    Parse {
        file: String,
    },
    /// Generate fake 837 interchanges for testing
    Fake {
        /// Output file, one interchange per line
        #[arg(default_value = "fake_claims.edi")]
        file: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Parse 837s, adjudicate them at a flat rate and emit 835 remittances
    Remit {
        file: String,
        /// Fraction of each charge the demo payer allows
        #[arg(long, default_value_t = 0.8)]
        rate: f64,
    },
}
