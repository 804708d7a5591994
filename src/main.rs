//! # Float Translation Backend - Entry Point
//!
//! Loads configuration, checks the translation engine, starts the
//! housekeeping loops and serves HTTP + WebSocket traffic until the server
//! receives SIGINT/SIGTERM.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context, Result};
use float_translation_backend::config::AppConfig;
use float_translation_backend::housekeeping::Housekeeping;
use float_translation_backend::state::AppState;
use float_translation_backend::translation::{HttpTranslationEngine, TranslationEngine};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting float-translation-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    // Never log the key itself.
    let api_key = match std::env::var(&config.engine.api_key_env) {
        Ok(key) if !key.trim().is_empty() => key,
        _ => bail!(
            "{} must be set to the translation engine API key",
            config.engine.api_key_env
        ),
    };

    let engine = HttpTranslationEngine::new(&config.engine, api_key)
        .context("failed to build translation engine client")?;
    if config.engine.probe_on_startup {
        engine
            .probe()
            .await
            .with_context(|| format!("translation engine at {} is unreachable", config.engine.endpoint))?;
        info!(model = engine.model_name(), "Translation engine reachable");
    } else {
        warn!("Skipping translation engine probe");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let routes = float_translation_backend::routes(&config.server);
    let app_state = AppState::new(config, Arc::new(engine));
    let housekeeping = Housekeeping::spawn(app_state.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(&routes)
    })
    .bind(&bind_addr)?
    .run();

    let result = server.await;
    housekeeping.shutdown();
    result?;

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "float_translation_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
