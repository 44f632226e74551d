use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use token_tracker::config::{Config, ConfigLayer, StorageLayer, merge_layers};
use token_tracker::query::commands::{TransferQuery, cmd_tokens, cmd_transfers};
use token_tracker::query::{DEFAULT_LIMIT, OutputFormat, QueryService};
use token_tracker::repository::Pagination;
use token_tracker::store::{StoreRegistry, TransferStore};

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query tracked ERC20 tokens and transfers", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Storage endpoint, overrides the configured one
    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Tokens {
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    Transfers {
        #[arg(long)]
        from: Vec<String>,

        #[arg(long)]
        to: Vec<String>,

        #[arg(long = "token")]
        tokens: Vec<String>,

        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let mut layers = Vec::new();
    if let Some(path) = &cli.config {
        layers.push(ConfigLayer::from_yaml_file(path)?);
    }
    layers.push(ConfigLayer::from_env()?);
    layers.push(ConfigLayer {
        storage: StorageLayer {
            endpoint: cli.database.clone(),
            ..StorageLayer::default()
        },
        ..ConfigLayer::default()
    });
    let config = merge_layers(Config::default(), &layers);

    let store = StoreRegistry::with_builtin().build(&config.storage)?;
    let service = QueryService::new(store.clone());

    let output = match cli.command {
        Commands::Tokens { limit, offset } => {
            cmd_tokens(&service, Pagination::new(limit, offset), format).await?
        }
        Commands::Transfers {
            from,
            to,
            tokens,
            limit,
            offset,
        } => {
            let query = TransferQuery {
                from,
                to,
                tokens,
                limit,
                offset,
            };
            cmd_transfers(&service, query, format).await?
        }
    };
    println!("{output}");

    store.close()?;
    Ok(())
}
