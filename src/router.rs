use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::metrics::MetricsSnapshot;
use crate::shared::AppState;
use crate::{auth, forum, papers};

async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.auth_metrics.snapshot())
}

/// Assembles the full application router. Mutating forum routes sit behind
/// the auth middleware; everything else is public.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::handlers::register))
        .route("/auth/login", post(auth::handlers::login))
        .route("/auth/logout", post(auth::handlers::logout))
        .route("/auth/refresh", post(auth::handlers::refresh))
        .route("/auth/me", get(auth::handlers::me))
        .route("/auth/verify", post(auth::handlers::verify_email))
        .route("/auth/password/forgot", post(auth::handlers::forgot_password))
        .route("/auth/password/reset", put(auth::handlers::reset_password))
        .route("/forum/posts", get(forum::handlers::list_posts))
        .route("/forum/posts/:id", get(forum::handlers::get_post))
        .route("/papers/catalog", get(papers::handlers::fetch_catalog))
        .route("/metrics", get(metrics_snapshot));

    let protected = Router::new()
        .route("/forum/posts", post(forum::handlers::create_post))
        .route(
            "/forum/posts/:id",
            put(forum::handlers::edit_post).delete(forum::handlers::delete_post),
        )
        .route("/forum/posts/:id/replies", post(forum::handlers::create_reply))
        .route(
            "/forum/posts/:id/replies/:reply_id",
            delete(forum::handlers::delete_reply),
        )
        .route("/forum/posts/:id/pin", post(forum::handlers::toggle_pin))
        .route("/forum/posts/:id/lock", post(forum::handlers::toggle_lock))
        .route("/forum/posts/:id/restore", post(forum::handlers::restore_post))
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
