//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Chat-driven administrative approval assistant for Feishu/Lark.
#[derive(Parser, Debug)]
#[command(name = "larkdesk")]
#[command(version)]
#[command(about = "Chat-driven approval assistant for Feishu/Lark.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the event gateway and the auto-approval poll loop
    Serve {
        /// Host to bind to (overrides LARKDESK_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides LARKDESK_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate the rules file and print the effective rule table
    CheckRules {
        /// Rules file path (overrides LARKDESK_RULES_FILE)
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Fetch an approval form definition and print its widget layout
    DebugForm {
        /// Ticket type slug (seal-use, purchase, invoice, reception-supplies,
        /// outbound-report)
        kind: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::parse_from(["larkdesk", "serve", "--host", "0.0.0.0", "-p", "9000"]);
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn debug_form_takes_a_kind_slug() {
        let cli = Cli::parse_from(["larkdesk", "debug-form", "seal-use"]);
        match cli.command {
            Commands::DebugForm { kind } => assert_eq!(kind, "seal-use"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
