use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Rule-driven response engine for runtime-security alerts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to the process config file.
    #[arg(long, global = true, default_value = "warden.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ingress listener and dispatch events as they arrive.
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },

    /// Check cluster connectivity and validate the configured rule file.
    Check,

    /// Manage rule files.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// Parse and validate a rule file against the registered plugins.
    Validate {
        /// Path to the rule file; defaults to the config's `rules_path`.
        path: Option<String>,
    },

    /// Print the parsed rule set back out, one line per rule.
    Print {
        path: Option<String>,
    },
}
