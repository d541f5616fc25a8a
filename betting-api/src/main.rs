//! Betting Engine API Server
//!
//! HTTP front end for bet placement, market resolution and reconciliation.

mod routes;

use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use betting_services::{
    AccountService, BetPlacementService, BettingConfig, CleanupService, Clock, LedgerStore,
    MarketResolutionService, MarketService, ReconciliationService, SqliteLedger, SystemClock,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub placement: Arc<BetPlacementService>,
    pub resolution: Arc<MarketResolutionService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub cleanup: Arc<CleanupService>,
    pub markets: Arc<MarketService>,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    /// Wire every service to one ledger and clock
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: BettingConfig) -> Self {
        Self {
            placement: Arc::new(BetPlacementService::new(
                store.clone(),
                clock.clone(),
                config.clone(),
            )),
            resolution: Arc::new(MarketResolutionService::new(
                store.clone(),
                clock.clone(),
                config.clone(),
            )),
            reconciliation: Arc::new(ReconciliationService::new(store.clone())),
            cleanup: Arc::new(CleanupService::new(store.clone(), config.cleanup_keep)),
            markets: Arc::new(MarketService::new(store.clone(), clock)),
            accounts: Arc::new(AccountService::new(store, config.starting_balance)),
        }
    }
}

/// Build the application router with CORS and request tracing
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(routes::USER_ID_HEADER),
        ]);

    Router::new()
        .nest("/api", routes::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,betting_api=debug")),
        )
        .init();

    info!("Starting Betting Engine API");

    let config = BettingConfig::from_env()?;
    info!(
        "Betting limits: min {} / max {}, {}ms between bets on one market",
        config.min_bet,
        config.max_bet,
        config.rate_limit_window_ms()
    );

    let db_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/betting.db".to_string());
    info!("Initializing ledger at: {}", db_path);
    let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(&db_path)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let state = AppState::new(ledger, clock, config);

    // Credits left over from a previous run
    let pending = state.reconciliation.list_pending().await?;
    if !pending.is_empty() {
        tracing::warn!(
            "{} credits awaiting reconciliation, retry via POST /api/reconciliation/retry",
            pending.len()
        );
    }

    let app = build_router(state);

    let port: u16 = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Server listening on http://{}", addr);
    info!("API endpoints:");
    info!("  POST /api/bets                     - Place a bet");
    info!("  POST /api/markets                  - Create a market");
    info!("  GET  /api/markets/{{id}}             - Get a market");
    info!("  POST /api/markets/{{id}}/resolve     - Resolve a market");
    info!("  POST /api/markets/cleanup          - Delete old markets");
    info!("  POST /api/accounts                 - Open an account");
    info!("  GET  /api/accounts/me              - Get the caller's account");
    info!("  GET  /api/reconciliation           - List pending credits");
    info!("  POST /api/reconciliation/retry     - Retry pending credits");
    info!("  GET  /api/health                   - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
