use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use estimate_manager::api::{self, AppState, SecurityConfig};
use estimate_manager::client::EstimateClient;
use estimate_manager::db;
use estimate_manager::models::Estimate;
use estimate_manager::render::render_estimate;

#[derive(Parser)]
#[command(name = "estimate")]
#[command(about = "Collaborative project estimates: epics, stories, tasks and the hours behind them")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the estimate server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "5000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// List estimates on the server
    List,
    /// Show an estimate as a tree with totals
    Show {
        /// Estimate id
        id: String,
    },
    /// List the drafts saved for an estimate
    Drafts {
        /// Estimate id
        id: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "estimate_manager=debug,estimate_core=info,tower_http=debug".into()),
    );

    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Serve { port, host }) => serve(&host, port).await?,
        Some(Commands::List) => {
            let client = EstimateClient::from_env();
            for estimate in client.list_estimates().await? {
                let state = if estimate.is_draft { "draft" } else { "final" };
                println!(
                    "{}  {}  {}  ({})",
                    estimate.id, estimate.start_date, estimate.project_name, state
                );
            }
        }
        Some(Commands::Show { id }) => {
            let client = EstimateClient::from_env();
            let record = client.get_estimate(&id).await?;
            let editors = record.active_editors.len();
            let estimate = Estimate::try_from(record)?;
            print!("{}", render_estimate(&estimate));
            if editors > 0 {
                println!("{} editor(s) connected", editors);
            }
        }
        Some(Commands::Drafts { id }) => {
            let client = EstimateClient::from_env();
            for draft in client.list_drafts(&id).await? {
                println!(
                    "{}  {}  {}",
                    draft.id,
                    draft.timestamp.format("%Y-%m-%d %H:%M"),
                    draft.name
                );
            }
        }
        None => serve("127.0.0.1", 5000).await?,
    }

    Ok(())
}

async fn serve(host: &str, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting estimate server on port {}", port);

    let db = db::Database::open_default()?;
    db.migrate()?;

    let security = SecurityConfig::from_env();
    if let Some(limiter) = security.rate_limiter.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.window());
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        });
    }

    let app = api::create_app(AppState::new(db), security);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::info!("Estimate server listening on http://{}:{}", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}
