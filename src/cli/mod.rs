pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "eventdesk")]
#[command(about = "EventDesk - multi-tenant event management API server")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP API server (default)")]
    Serve {
        #[arg(long, help = "Apply pending migrations before listening")]
        migrate: bool,
    },

    #[command(about = "Apply pending database migrations and exit")]
    Migrate,

    #[command(about = "Create an initial user and tenant, printing a tenant-scoped token")]
    Bootstrap {
        #[arg(long, help = "Email of the owner account")]
        email: String,
        #[arg(long, help = "Display name of the owner account")]
        name: String,
        #[arg(long, help = "Password of the owner account")]
        password: String,
        #[arg(long, help = "Tenant display name")]
        tenant: String,
        #[arg(long, help = "Tenant slug (derived from the name when omitted)")]
        slug: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command.unwrap_or(Commands::Serve { migrate: false }) {
        Commands::Serve { migrate } => commands::serve::handle(migrate).await,
        Commands::Migrate => commands::migrate::handle(output_format).await,
        Commands::Bootstrap {
            email,
            name,
            password,
            tenant,
            slug,
        } => {
            let args = commands::bootstrap::BootstrapArgs {
                email,
                name,
                password,
                tenant,
                slug,
            };
            commands::bootstrap::handle(args, output_format).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["eventdesk"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Text);
    }

    #[test]
    fn parses_bootstrap_arguments() {
        let cli = Cli::try_parse_from([
            "eventdesk",
            "--json",
            "bootstrap",
            "--email",
            "owner@acme.test",
            "--name",
            "Owner",
            "--password",
            "correct horse",
            "--tenant",
            "Acme Events",
        ])
        .unwrap();
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Json);
        match cli.command {
            Some(Commands::Bootstrap { email, slug, .. }) => {
                assert_eq!(email, "owner@acme.test");
                assert!(slug.is_none());
            }
            _ => panic!("expected bootstrap"),
        }
    }
}
