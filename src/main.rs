// Main entry point for the attendance gate

use attendance_gate::api::{create_router, AccessStore, AppState, AttendanceStore, Mailer, UserStore};
use attendance_gate::auth::audit_logger::AuditLogger;
use attendance_gate::auth::gate::RequestGate;
use attendance_gate::auth::link::AttendanceLinks;
use attendance_gate::auth::permission::PermissionResolver;
use attendance_gate::auth::session::SessionCodec;
use attendance_gate::auth::ticket::EmailTickets;
use attendance_gate::config::Config;
use attendance_gate::infra::mailer::{HttpMailer, LogMailer};
use attendance_gate::infra::postgres::PgStore;
use attendance_gate::state::redis_store::RedisCredentialStore;

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration before any logging
    let config = Config::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?;

    // 2. Tracing; init() may only run once per process
    init_tracing(&config)?;

    info!(
        bind_address = %config.bind_address,
        port = config.port,
        public_origin = %config.public_origin,
        production = config.is_production(),
        "Starting attendance gate"
    );

    // 3. Expiring credential store
    let credential_store = Arc::new(
        RedisCredentialStore::new(&config.redis_url, config.redis_connection_timeout_secs)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to initialize Redis store");
                e
            })?,
    );
    info!("Redis store initialized");

    // 4. Relational store; connections open on first use
    let db_pool = PgStore::connect_lazy(&config.database_url, config.database_max_connections)?;
    let pg_store = Arc::new(PgStore::new(db_pool.clone()));
    info!(max_connections = config.database_max_connections, "Database pool configured");

    // Schema from migrations/; RUN_MIGRATIONS=false leaves it to an external tool
    if config.run_migrations {
        pg_store.run_migrations().await.map_err(|e| {
            error!(error = %e, "Failed to apply database migrations");
            e
        })?;
    }

    // 5. Mail delivery
    let mailer: Arc<dyn Mailer + Send + Sync> = match config.mail_api_url.clone() {
        Some(api_url) => Arc::new(HttpMailer::new(
            api_url,
            config.mail_api_token.clone(),
            config.mail_from.clone(),
            config.request_timeout_secs,
        )?),
        None => {
            warn!("MAIL_API_URL not set, mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    // 6. Credential and permission components
    let session_codec = Arc::new(SessionCodec::new(&config.session_secret, config.session_ttl_secs)?);
    let tickets = Arc::new(EmailTickets::new(credential_store.clone(), config.email_ticket_ttl_secs));
    let resolver = Arc::new(PermissionResolver::new(pg_store.clone()));
    let links = Arc::new(AttendanceLinks::new(pg_store.clone()));
    let audit_logger = Arc::new(AuditLogger::new(Some(Arc::new(db_pool))));

    let gate = Arc::new(RequestGate::new(
        session_codec.clone(),
        resolver.clone(),
        audit_logger.clone(),
    ));

    let access_store: Arc<dyn AccessStore + Send + Sync> = pg_store.clone();
    let user_store: Arc<dyn UserStore + Send + Sync> = pg_store.clone();
    let attendance_store: Arc<dyn AttendanceStore + Send + Sync> = pg_store;

    let app_state = AppState {
        session_codec,
        tickets,
        resolver,
        links,
        credential_store,
        access_store,
        user_store,
        attendance_store,
        mailer,
        audit_logger,
        config: Arc::new(config.clone()),
    };

    // 7. Router and server
    let router = create_router(app_state, gate);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind to address");
        e
    })?;

    info!(addr = %addr, "Server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
///
/// RUST_LOG takes precedence over LOG_LEVEL.
fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Graceful shutdown on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
