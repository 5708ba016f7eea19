use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rollup_core::{BatchConfig, RollupDb, SqliteStore};
use rollup_script::{load_transactions, parse_eth_address, BatchReport};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STATE_NAMESPACE: &str = "state";
const EXITS_NAMESPACE: &str = "exits";

#[derive(Parser, Debug)]
#[command(name = "rollup", about = "Build and inspect rollup batches")]
struct Args {
    /// SQLite database holding the rollup state
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://rollup.db")]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the next batch from a JSON array of transactions
    Build {
        /// Transaction file
        file: PathBuf,

        /// Coins collected by the fee plan, in slot order
        #[arg(long, value_delimiter = ',')]
        coins: Vec<u32>,

        /// Address receiving the collected fees
        #[arg(long)]
        beneficiary: Option<String>,

        /// Where to write the circuit witness
        #[arg(long, short, default_value = "witness.json")]
        output: PathBuf,

        #[arg(long, default_value_t = 4)]
        max_n_tx: usize,

        #[arg(long, default_value_t = 24)]
        n_levels: usize,

        /// Commit the batch to the database once built
        #[arg(long)]
        consolidate: bool,
    },
    /// Print the account stored at an index
    State {
        #[arg(long)]
        idx: u64,
    },
    /// Print an exit leaf and its proof
    Exit {
        #[arg(long)]
        batch: u64,
        #[arg(long)]
        idx: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let state = SqliteStore::connect(&args.database, STATE_NAMESPACE)
        .await
        .with_context(|| format!("Failed to open database {}", args.database))?;
    let exits = state.namespace(EXITS_NAMESPACE);
    let mut rollup = RollupDb::new(state, exits).await?;
    info!(
        last_batch = rollup.last_batch(),
        state_root = %rollup.state_root(),
        "opened rollup"
    );

    match args.command {
        Command::Build {
            file,
            coins,
            beneficiary,
            output,
            max_n_tx,
            n_levels,
            consolidate,
        } => {
            let txs = load_transactions(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let config = BatchConfig { max_n_tx, n_levels };

            let mut batch = rollup.build_batch(&config)?;
            for coin in coins {
                batch.add_coin(coin)?;
            }
            if let Some(address) = beneficiary {
                batch.set_beneficiary(parse_eth_address(&address)?)?;
            }
            for tx in txs {
                batch.add_tx(tx)?;
            }
            batch.build().await?;

            let witness = serde_json::to_string_pretty(batch.input()?)?;
            std::fs::write(&output, witness)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(path = %output.display(), "witness written");

            println!("{}", serde_json::to_string_pretty(&BatchReport::from_batch(&batch)?)?);

            if consolidate {
                rollup.consolidate(&batch).await?;
                info!(batch = rollup.last_batch(), "batch consolidated");
            }
        }
        Command::State { idx } => match rollup.get_state_by_idx(idx).await? {
            Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
            None => bail!("No account at index {}", idx),
        },
        Command::Exit { batch, idx } => {
            let exit = rollup.get_exit_info(batch, idx).await?;
            if exit.state.is_none() {
                bail!("No exit for index {} in batch {}", idx, batch);
            }
            println!("{}", serde_json::to_string_pretty(&exit)?);
        }
    }

    Ok(())
}
