use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use tower::ServiceExt;

use studyhall::auth::token::TokenConfig;
use studyhall::forum::repository::InMemoryForumRepository;
use studyhall::mailer::Mailer;
use studyhall::metrics::AuthMetrics;
use studyhall::papers::{PayloadCipher, SigningConfig, StaticUpstreamCatalog};
use studyhall::user::repository::InMemoryUserRepository;
use studyhall::user::{Role, UserModel};
use studyhall::{build_router, AppState, UserRepository};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

/// Captures outbound emails so flows that consume mailed tokens can finish
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn last_token(&self) -> String {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, token)| token.clone())
            .expect("no mail was sent")
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(&self, email: &str, token: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), token.to_string()));
    }

    async fn send_password_reset(&self, email: &str, token: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), token.to_string()));
    }
}

pub struct TestApp {
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub fn new() -> Self {
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState {
            user_repository: Arc::new(InMemoryUserRepository::new()),
            forum_repository: Arc::new(InMemoryForumRepository::new()),
            mailer: mailer.clone(),
            auth_metrics: Arc::new(AuthMetrics::new()),
            token_config: TokenConfig::with_secret("integration-secret"),
            papers_signing: SigningConfig::with_secret("integration-papers-secret", 300),
            papers_cipher: PayloadCipher::from_secret("integration-papers-encryption"),
            papers_upstream: Arc::new(StaticUpstreamCatalog::default()),
            require_verification: false,
            cookie_secure: false,
        };
        Self { state, mailer }
    }

    /// Seeds a user directly in the repository and returns an access-token
    /// cookie for them. Lets tests act as moderators and admins without a
    /// role-promotion endpoint.
    pub async fn seed_user(&self, id: &str, username: &str, role: Role) -> String {
        let mut user = UserModel::new(
            username.to_string(),
            format!("{username}@x.com"),
            bcrypt::hash("integration-pw", 4).unwrap(),
        );
        user.id = id.to_string();
        user.role = role;
        user.verified = true;
        self.state.user_repository.create_user(&user).await.unwrap();

        let token = self.state.token_config.issue_access(&user, false).unwrap();
        format!("access_token={token}")
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
        cookie: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = build_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

        TestResponse {
            status,
            headers,
            json,
        }
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: serde_json::Value,
}

impl TestResponse {
    /// All Set-Cookie values on the response
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .collect()
    }

    /// Builds a Cookie header from the response's Set-Cookie values
    pub fn cookie_header(&self) -> String {
        self.set_cookies()
            .iter()
            .filter_map(|c| c.split(';').next())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
