use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use telecare_backend::{
    config::Config,
    db::connection::{create_pool, DbPool},
    docs, handlers,
    middleware::{auth, request_id},
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telecare_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        database_url = %config.database_url,
        server_port = config.server_port,
        auth_token_secret = %mask_secret(&config.auth_token_secret),
        join_link_secret = %mask_secret(&config.join_link_secret),
        join_link_ttl_hours = config.join_link_ttl_hours,
        outbound_queue_size = config.outbound_queue_size,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool: DbPool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(pool.as_ref()).await?;

    let port = config.server_port;
    let state = AppState::new(pool, config);

    // Public routes: link resolution, the socket itself and health. The
    // socket authenticates by participant binding, the link by signature.
    let public_routes = Router::new()
        .route(
            "/api/telemedicine/sessions/patient-link/{token}",
            get(handlers::sessions::resolve_patient_link),
        )
        .route(
            "/api/telemedicine/ws/{session_id}/{participant_key}",
            get(handlers::ws::ws_handler),
        )
        .route(
            "/api/telemedicine/health",
            get(handlers::health::health_check),
        );

    // Authenticated routes (bearer principal verified by middleware)
    let protected_routes = Router::new()
        .route(
            "/api/telemedicine/sessions",
            post(handlers::sessions::create_session).get(handlers::sessions::list_sessions),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}",
            get(handlers::sessions::get_session),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/join",
            post(handlers::sessions::join_session),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/start",
            post(handlers::sessions::start_session),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/end",
            post(handlers::sessions::end_session),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/cancel",
            post(handlers::sessions::cancel_session),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/fail",
            post(handlers::sessions::fail_session),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/issues",
            post(handlers::sessions::report_issue),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/patient-link",
            post(handlers::sessions::issue_patient_link),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/consent",
            post(handlers::consents::request_consent),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/consents",
            get(handlers::consents::list_consents),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/consent-version",
            put(handlers::consents::set_consent_version),
        )
        .route(
            "/api/telemedicine/consent/{consent_id}/respond",
            post(handlers::consents::respond_consent),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/messages",
            post(handlers::messages::send_message).get(handlers::messages::list_messages),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/messages/{message_id}",
            get(handlers::messages::get_message).delete(handlers::messages::delete_message),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/files",
            post(handlers::files::upload_file).get(handlers::files::list_files),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/analytics",
            get(handlers::analytics::get_analytics),
        )
        .route(
            "/api/telemedicine/sessions/{session_id}/analytics/satisfaction",
            post(handlers::analytics::record_satisfaction),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::auth,
        ));

    // Compose app with shared layers (CORS/Trace/RequestId) and shared state
    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(
            SwaggerUi::new("/docs").url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(request_id::request_id))
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([
                            Method::GET,
                            Method::POST,
                            Method::PUT,
                            Method::DELETE,
                            Method::OPTIONS,
                        ])
                        .allow_headers(Any)
                        .max_age(std::time::Duration::from_secs(24 * 60 * 60)),
                ),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
