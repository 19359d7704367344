use std::sync::Arc;

use augur_core::{AugurConfig, FeatureSchema, HttpPredictor, PgFormStore};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use augur_server::http::{self, HttpState};
use augur_server::subsystems::predict::BatchOptions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "augur.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match AugurConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match augur_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match augur_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Augur DB health check passed");
        return Ok(());
    }

    let schema = FeatureSchema::from_config(&config.features)?;
    let predictor = HttpPredictor::new(config.predictor.clone())?;

    tracing::info!(
        predictor = predictor.url(),
        schema = %schema.version,
        max_concurrency = config.prediction.max_concurrency,
        "Prediction pipeline configured"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    let state = Arc::new(HttpState {
        store: Arc::new(PgFormStore::new(pool)),
        predictor: Arc::new(predictor),
        schema: Arc::new(schema),
        options: BatchOptions::from(&config),
        shutdown,
    });

    let addr = format!("{}:{}", config.http.host, config.http.port);
    http::start_http_server(&addr, state).await?;

    Ok(())
}
