use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixshop_session::{
    Config, DurableStore, Error, IdentityRegistry, SessionStore, SqliteMedium, SystemClock,
};

/// Maintenance tool for the edit-session store
#[derive(Parser)]
#[command(name = "pixshop-session")]
#[command(about = "Inspect and maintain stored Pixshop edit sessions")]
#[command(version)]
struct Cli {
    /// Database file (defaults to the platform data directory)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recent sessions for an owner (the local owner when omitted)
    Sessions {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Remove expired records and prune the owner's session index
    Sweep {
        #[arg(long)]
        owner: Option<String>,
    },

    /// End the liveness session and wipe every stored record
    Reset,
}

fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixshop_session=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let db_path = cli
        .db
        .or_else(Config::default_db_path)
        .ok_or(Error::NoDataDir)?;
    let medium = SqliteMedium::open(&db_path)?;
    tracing::debug!(path = %db_path.display(), "opened session store");

    let store = Arc::new(DurableStore::new(
        medium,
        Arc::new(SystemClock),
        config.namespace.clone(),
    ));
    let identity = IdentityRegistry::new(store.clone(), &config);
    let sessions = SessionStore::new(store.clone(), &config);

    match cli.command {
        Commands::Sessions { owner } => {
            let owner = owner.unwrap_or_else(|| identity.owner_id());
            let summaries = sessions.summaries(&owner);
            if summaries.is_empty() {
                println!("No stored sessions for {}", owner);
            }
            for summary in summaries {
                let saved_at_ms = summary.saved_at_epoch_millis;
                let saved_at = chrono::DateTime::from_timestamp_millis(saved_at_ms)
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| saved_at_ms.to_string());
                println!(
                    "{}  {}  {} edits  {:?}",
                    summary.session_id, saved_at, summary.history_len, summary.active_mode
                );
            }
        }
        Commands::Sweep { owner } => {
            let owner = owner.unwrap_or_else(|| identity.owner_id());
            let expired = store.sweep_expired();
            let pruned = sessions.sweep_expired_for_owner(&owner);
            println!("Removed {} expired records, pruned {} index entries", expired, pruned);
        }
        Commands::Reset => {
            identity.end_session()?;
            println!("Session store cleared");
        }
    }

    Ok(())
}
