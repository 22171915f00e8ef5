use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studyhall::forum::repository::InMemoryForumRepository;
use studyhall::mailer::ConsoleMailer;
use studyhall::papers::StaticUpstreamCatalog;
use studyhall::user::repository::InMemoryUserRepository;
use studyhall::{build_router, AppState};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studyhall=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting studyhall server");

    // Create shared application state with dependency injection
    // Easy to switch between implementations:
    let user_repository = Arc::new(InMemoryUserRepository::new());
    let forum_repository = Arc::new(InMemoryForumRepository::new());

    // For production with PostgreSQL:
    // let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    // let pool = sqlx::PgPool::connect(&database_url).await.expect("Failed to connect to database");
    // let user_repository = Arc::new(studyhall::user::repository::PostgresUserRepository::new(pool.clone()));
    // let forum_repository = Arc::new(studyhall::forum::repository::PostgresForumRepository::new(pool));

    // The upstream papers service, when configured:
    // let papers_upstream = Arc::new(studyhall::papers::HttpUpstreamCatalog::new(
    //     std::env::var("PAPERS_UPSTREAM_URL").expect("PAPERS_UPSTREAM_URL must be set"),
    // ));
    let papers_upstream = Arc::new(StaticUpstreamCatalog::default());

    let app_state = AppState::new(
        user_repository,
        forum_repository,
        Arc::new(ConsoleMailer),
        papers_upstream,
    );

    let app = build_router(app_state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .unwrap();
    info!("Server running on http://localhost:{port}");
    axum::serve(listener, app).await.unwrap();
}
