//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        kopokopo::Credentials, DbAdapter, InMemorySessionStore, KopoKopoClient,
        RedisSessionStore, WhatsAppClient,
    },
    config::Config,
    engine::{DialogueEngine, EnginePorts, EngineSettings, FollowUpScheduler},
    error::ApiError,
    events::EventBus,
    orders::OrderLifecycle,
    payments::{DispatchQueue, DispatchSettings, PaymentReconciler},
    web::{
        self,
        rest::ApiDoc,
        state::{AppState, WebhookSecrets},
    },
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use bar_bot_core::ports::SessionStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Session Store & Provider Adapters ---
    let sessions: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => {
            info!("Using Redis session store");
            Arc::new(
                RedisSessionStore::connect(url)
                    .await
                    .map_err(|e| ApiError::Internal(format!("Failed to connect to Redis: {e}")))?,
            )
        }
        None => {
            warn!("REDIS_URL not set; sessions are kept in memory and lost on restart");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let chat = Arc::new(
        WhatsAppClient::new(
            &config.whatsapp.api_base,
            &config.whatsapp.phone_number_id,
            &config.whatsapp.token,
            config.http_timeout,
        )
        .map_err(|e| ApiError::Internal(format!("Failed to build chat client: {e}")))?,
    );

    let kopokopo = &config.kopokopo;
    let credentials = match (&kopokopo.access_token, &kopokopo.client_id, &kopokopo.client_secret) {
        (Some(token), _, _) => Credentials::Static(token.clone()),
        (None, Some(client_id), Some(client_secret)) => Credentials::OAuth {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        },
        _ => {
            return Err(ApiError::Internal(
                "Kopo Kopo credentials are incomplete".to_string(),
            ))
        }
    };
    let payments = Arc::new(
        KopoKopoClient::new(
            &kopokopo.base_url,
            &kopokopo.till_number,
            &kopokopo.callback_url,
            credentials,
            config.http_timeout,
        )
        .map_err(|e| ApiError::Internal(format!("Failed to build payment client: {e}")))?,
    );
    if kopokopo.webhook_secret.is_none() {
        warn!("KOPOKOPO_WEBHOOK_SECRET not set; payment webhook signatures are NOT verified");
    }
    if config.whatsapp.app_secret.is_none() {
        warn!("WHATSAPP_APP_SECRET not set; chat webhook signatures are NOT verified");
    }

    // --- 4. Start the Payment Dispatch Worker ---
    let (dispatch, worker) = DispatchQueue::new(
        payments,
        DispatchSettings {
            interval: config.dispatch_interval,
            capacity: config.payment_queue_capacity,
            dedup_window: config.dedup_window,
        },
    );
    let shutdown = CancellationToken::new();
    let worker_task = tokio::spawn(worker.run(shutdown.clone()));

    // --- 5. Build the Engine, Reconciler and Order Lifecycle ---
    let events = EventBus::new();
    let follow_ups = FollowUpScheduler::new(config.follow_up_delay, db_adapter.clone(), chat.clone());
    let engine = DialogueEngine::new(
        EnginePorts {
            catalog: db_adapter.clone(),
            sessions,
            orders: db_adapter.clone(),
            users: db_adapter.clone(),
            chat: chat.clone(),
            events: events.clone(),
        },
        dispatch,
        follow_ups.clone(),
        EngineSettings {
            bar_name: config.bar_name.clone(),
            session_ttl: config.session_ttl,
        },
    );
    let reconciler = PaymentReconciler::new(
        db_adapter.clone(),
        db_adapter.clone(),
        chat.clone(),
        events.clone(),
        follow_ups,
        config.bar_staff_phones.clone(),
    );
    let lifecycle = OrderLifecycle::new(
        db_adapter.clone(),
        db_adapter.clone(),
        chat,
        events.clone(),
        config.bar_staff_phones.clone(),
    );
    if config.bar_staff_phones.is_empty() {
        warn!("BAR_STAFF_PHONES is empty; nobody will be told about paid orders in chat");
    }

    let app_state = Arc::new(AppState {
        engine,
        reconciler,
        lifecycle,
        staff: db_adapter,
        events,
        webhooks: WebhookSecrets::from(config.as_ref()),
    });

    // --- 6. Create the Web Router ---
    let mut api_router = web::router(app_state);
    if let Some(origin) = &config.cors_allowed_origin {
        let origin = origin.parse::<HeaderValue>().map_err(|e| {
            ApiError::Internal(format!("Invalid CORS_ALLOWED_ORIGIN '{origin}': {e}"))
        })?;
        let cors = CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, ACCEPT]);
        api_router = api_router.layer(cors);
    }

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped; stopping payment dispatch worker");
    shutdown.cancel();
    if let Err(e) = worker_task.await {
        warn!("Payment dispatch worker ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
