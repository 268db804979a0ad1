use env_logger::Builder;
use log::{error, info, warn};
use paper_trader::api;
use paper_trader::auth::create_token;
use paper_trader::config::{Config, Storage};
use paper_trader::context::AppContext;
use paper_trader::db::{self, PortfolioStore, ScyllaStore, TaskStore, TradeLog};
use paper_trader::engine::{Engine, EngineConfig};
use paper_trader::locks::UserLocks;
use paper_trader::memory::MemoryStore;
use paper_trader::notify::{DiscordNotifier, LogNotifier, Notifier};
use paper_trader::quotes::AlphaVantage;
use reqwest::Client;
use std::env;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    // `paper_trader token <user_id>` prints a bearer token and exits.
    let args: Vec<String> = env::args().collect();
    if args.get(1).map(String::as_str) == Some("token") {
        let Some(user_id) = args.get(2) else {
            eprintln!("usage: paper_trader token <user_id>");
            process::exit(2);
        };
        match create_token(user_id, &config.jwt_secret) {
            Ok(token) => println!("{}", token),
            Err(e) => {
                eprintln!("Failed to create token: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    Builder::new()
        .filter_level(config.log_level)
        .format_timestamp_secs()
        .init();

    let (portfolios, tasks, trades): (
        Arc<dyn PortfolioStore>,
        Arc<dyn TaskStore>,
        Arc<dyn TradeLog>,
    ) = match config.storage {
        Storage::Scylla => {
            let session = match db::init(&config.scylla_node).await {
                Ok(session) => session,
                Err(e) => {
                    error!("Failed to initialize database: {}", e);
                    return;
                }
            };
            info!("Connected to database at {}", config.scylla_node);
            let store = Arc::new(ScyllaStore::new(session));
            (store.clone(), store.clone(), store)
        }
        Storage::Memory => {
            warn!("Using in-memory storage; state is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store.clone(), store)
        }
    };

    let client = Client::new();
    let notifier: Arc<dyn Notifier> = match &config.discord_bot_token {
        Some(token) => Arc::new(DiscordNotifier::new(client.clone(), token)),
        None => {
            warn!("DISCORD_BOT_TOKEN is not set; notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let ctx = AppContext {
        quotes: Arc::new(AlphaVantage::new(client, &config.alphavantage_api_key)),
        portfolios,
        tasks,
        trades,
        notifier,
        locks: UserLocks::new(),
        starting_balance: config.starting_balance,
    };

    let engine = Engine::new(
        ctx.clone(),
        EngineConfig {
            interval: config.eval_interval,
            quote_delay: config.quote_delay,
        },
    );
    let routes = api::api(ctx, Arc::new(config.jwt_secret.clone()));

    info!("Server running on http://{}", config.bind_addr);
    tokio::select! {
        _ = engine.run() => {}
        _ = warp::serve(routes).run(config.bind_addr) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
}
