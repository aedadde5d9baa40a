use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::backend::UserId;
use crate::error::AppResult;
use crate::extractors::MaybeUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

fn signed_in(state: &AppState, status: StatusCode, user_id: UserId, token: String) -> Response {
    let auth = &state.config.auth;
    (
        status,
        [(
            header::SET_COOKIE,
            session_cookie(&auth.cookie_name, &token, auth.session_hours),
        )],
        Json(json!({ "user_id": user_id, "token": token })),
    )
        .into_response()
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> AppResult<Response> {
    let creds = state.config.auth.credentials();
    let (user_id, token) = auth::sign_up(&state.backend, &req.email, &req.password, creds).await?;
    Ok(signed_in(&state, StatusCode::CREATED, user_id, token))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> AppResult<Response> {
    let creds = state.config.auth.credentials();
    let (user_id, token) = auth::sign_in(&state.backend, &req.email, &req.password, creds).await?;
    Ok(signed_in(&state, StatusCode::OK, user_id, token))
}

/// POST /auth/logout. Always clears the cookie, signed in or not.
pub async fn logout(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> Response {
    if let Some(user) = user {
        if let Err(e) = auth::sign_out(&state.backend, &user.token).await {
            tracing::warn!(user_id = %user.id, "session delete failed: {}", e);
        }
    }

    (
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )],
    )
        .into_response()
}
