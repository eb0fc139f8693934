mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::Warden;

pub use handlers::{ArtifactReport, ChainReport};

pub fn create_router(warden: Warden) -> Router {
    let api = Router::new()
        // Sessions
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions", post(handlers::start_session))
        .route("/sessions/sweep", post(handlers::sweep))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/heartbeat", post(handlers::heartbeat))
        .route("/sessions/{id}/end", post(handlers::end_session))
        .route("/sessions/{id}/claims", get(handlers::list_session_claims))
        .route("/sessions/{id}/claims", post(handlers::create_claim))
        // Claims
        .route("/claims/{id}", get(handlers::get_claim))
        .route("/claims/{id}/release", post(handlers::release_claim))
        // Intents
        .route("/intents", get(handlers::list_intents))
        .route("/intents", post(handlers::create_intent))
        .route("/intents/{id}", get(handlers::get_intent))
        .route("/intents/{id}/approve", post(handlers::approve_intent))
        .route("/intents/{id}/reject", post(handlers::reject_intent))
        .route("/intents/{id}/start", post(handlers::start_intent))
        .route("/intents/{id}/complete", post(handlers::complete_intent))
        .route("/intents/{id}/fail", post(handlers::fail_intent))
        // Projects
        .route("/projects/{project}/claims", get(handlers::list_active_claims))
        .route("/projects/{project}/builds", post(handlers::record_build))
        .route("/projects/{project}/chain", get(handlers::verify_chain))
        // Evidence
        .route("/manifests", get(handlers::list_manifests))
        .route("/manifests/{build_id}", get(handlers::get_manifest))
        .route(
            "/manifests/{build_id}/artifacts",
            get(handlers::verify_manifest_artifacts),
        )
        .route("/artifacts/{hash}", get(handlers::get_artifact))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(warden)
}
