use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::info;

use gradebox::server::{self, AppState};
use gradebox::session::{session_value_from_cookies, MemorySessions, UserIdentity};
use gradebox::{ChallengeRegistry, DockerRunner, MochaHooks, ScoreStore, SubmissionOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gradebox=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let challenge_root =
        std::env::var("CHALLENGE_DIR").unwrap_or_else(|_| "./challenges".into());
    let store_dir = std::env::var("STORE_DIR").unwrap_or_else(|_| "./store".into());
    let work_dir = std::env::var("WORK_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("gradebox-work"));
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let cookie_name = std::env::var("SESSION_COOKIE").unwrap_or_else(|_| "gradebox.sid".into());

    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("could not create work directory {}", work_dir.display()))?;

    let registry = Arc::new(
        ChallengeRegistry::new(&challenge_root)
            .with_default_hooks(Arc::new(MochaHooks::default())),
    );
    info!(
        "serving {} challenge(s) from {}",
        registry.list()?.len(),
        challenge_root
    );

    let store = Arc::new(ScoreStore::new(&store_dir));
    let orchestrator = Arc::new(SubmissionOrchestrator::new(
        Arc::clone(&store),
        Arc::new(DockerRunner),
        &work_dir,
    ));
    let sessions = Arc::new(MemorySessions::new());

    let state = AppState {
        registry,
        store,
        orchestrator,
        sessions: Arc::clone(&sessions) as Arc<dyn gradebox::IdentityResolver>,
        cookie_name: cookie_name.clone(),
    };

    let auth = AuthState {
        sessions,
        cookie_name,
    };

    let app = Router::new()
        .route("/login", get(login))
        .route("/logout", get(logout))
        .with_state(auth)
        .merge(server::router(state));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("could not bind {}", bind_addr))?;
    info!("listening on {}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Clone)]
struct AuthState {
    sessions: Arc<MemorySessions>,
    cookie_name: String,
}

/// Demo login: `GET /login?user=bob` starts a session for that name. A
/// real deployment replaces this with its own identity provider behind
/// the `IdentityResolver` seam.
async fn login(
    State(auth): State<AuthState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(user) = params.get("user").filter(|u| !u.is_empty()) else {
        return StatusCode::FORBIDDEN.into_response();
    };

    let identity = UserIdentity {
        id: user.clone(),
        username: user.clone(),
    };
    let value = auth.sessions.create(identity).await;
    let cookie = format!("{}={}; Path=/; HttpOnly", auth.cookie_name, value);

    ([(header::SET_COOKIE, cookie)], StatusCode::OK).into_response()
}

async fn logout(State(auth): State<AuthState>, headers: HeaderMap) -> impl IntoResponse {
    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok());
    if let Some(value) = session_value_from_cookies(&auth.cookie_name, cookie_header) {
        auth.sessions.destroy(&value).await;
    }
    StatusCode::OK
}
