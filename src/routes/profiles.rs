use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::backend::{Profile, ProfileFields};
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::profiles::ProfileStore;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/profile",
        get(show_profile).post(create_profile).put(update_profile),
    )
}

/// GET /profile
pub async fn show_profile(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Profile>> {
    let profile = ProfileStore::new(state.backend).get_profile(&user.id).await?;
    Ok(Json(profile))
}

/// POST /profile
pub async fn create_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(fields): Json<ProfileFields>,
) -> AppResult<(StatusCode, Json<Profile>)> {
    let profile = ProfileStore::new(state.backend)
        .create_profile(&user.id, fields)
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// PUT /profile
pub async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(fields): Json<ProfileFields>,
) -> AppResult<Json<Profile>> {
    let profile = ProfileStore::new(state.backend)
        .update_profile(&user.id, fields)
        .await?;
    Ok(Json(profile))
}
