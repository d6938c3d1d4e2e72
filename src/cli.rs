use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "shopdesk")]
#[command(about = "Shopdesk inbox and storefront admin service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Run the HTTP API and the outbound forwarder")]
    Serve,

    #[command(about = "Run a single forwarder tick and print the summary")]
    ForwardOnce,

    #[command(about = "Report data integrity problems without repairing them")]
    Diagnose {
        #[arg(long, help = "Only inspect this company")]
        company: Option<i64>,
    },

    #[command(about = "Show pending and dead-lettered message counts")]
    Status,

    #[command(about = "Validate the configuration file")]
    ValidateConfig,

    #[command(about = "Print an Argon2 hash for a password")]
    HashPassword {
        #[arg(long)]
        password: String,
    },
}

impl Cli {
    /// The subcommand to run; `serve` when none was given.
    pub fn command(&self) -> &Commands {
        self.command.as_ref().unwrap_or(&Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::try_parse_from(["shopdesk", "--config", "local.yaml"]).unwrap();
        assert_eq!(cli.command(), &Commands::Serve);
        assert_eq!(cli.config, PathBuf::from("local.yaml"));
    }

    #[test_case(&["shopdesk", "forward-once"], Commands::ForwardOnce ; "forward once")]
    #[test_case(&["shopdesk", "status"], Commands::Status ; "status")]
    #[test_case(&["shopdesk", "validate-config"], Commands::ValidateConfig ; "validate config")]
    #[test_case(&["shopdesk", "diagnose"], Commands::Diagnose { company: None } ; "diagnose all")]
    #[test_case(&["shopdesk", "diagnose", "--company", "12"], Commands::Diagnose { company: Some(12) } ; "diagnose one")]
    fn parses_subcommands(args: &[&str], expected: Commands) {
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.command(), &expected);
    }

    #[test]
    fn hash_password_requires_a_password() {
        assert!(Cli::try_parse_from(["shopdesk", "hash-password"]).is_err());

        let cli =
            Cli::try_parse_from(["shopdesk", "hash-password", "--password", "hunter22"]).unwrap();
        assert_eq!(
            cli.command(),
            &Commands::HashPassword {
                password: "hunter22".to_string()
            }
        );
    }

    #[test]
    fn rejects_non_numeric_company() {
        assert!(Cli::try_parse_from(["shopdesk", "diagnose", "--company", "acme"]).is_err());
    }
}
