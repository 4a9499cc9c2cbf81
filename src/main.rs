use std::{net::SocketAddr, sync::Arc};

use tokio::signal;
use tracing::{info, warn};

use storefront_api as api;
use storefront_api::notifications::{EmailNotifier, LogNotifier, Notifier};
use storefront_api::services::payments::{PaymentGateway, StripeGateway};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    let db = api::db::establish_connection(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await?;
    }
    let db = Arc::new(db);

    let (event_sender, event_rx) = api::events::channel(1024);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway: Option<Arc<dyn PaymentGateway>> = match cfg.stripe_secret_key.clone() {
        Some(secret) => Some(Arc::new(StripeGateway::new(secret))),
        None => {
            warn!("No payment gateway secret configured; online checkout disabled");
            None
        }
    };

    let notifier: Arc<dyn Notifier> = match (cfg.email_api_url.clone(), cfg.email_api_key.clone())
    {
        (Some(url), Some(key)) => Arc::new(EmailNotifier::new(url, key, cfg.email_from.clone())),
        _ => {
            warn!("No email API configured; order confirmations will be logged only");
            Arc::new(LogNotifier)
        }
    };

    let services =
        api::handlers::AppServices::new(db.clone(), &cfg, event_sender.clone(), gateway, notifier);

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let router = api::app_router(state);
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
