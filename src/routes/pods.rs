use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::backend::{PodId, PodWithMembers, Profile};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, MaybeUser};
use crate::pods::{JoinOutcome, PodMembershipManager};
use crate::profiles::ProfileStore;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreatePodRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct PodView {
    #[serde(flatten)]
    pub pod: PodWithMembers,
    pub is_member: bool,
}

#[derive(Serialize)]
pub struct JoinResponse {
    pub pod_id: PodId,
    pub outcome: JoinOutcome,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pods", get(list_pods).post(create_pod))
        .route("/pods/{id}/join", post(join_pod))
}

/// Profile of the signed-in user, if they have made one.
pub(crate) async fn viewer_profile(
    state: &AppState,
    user: Option<&CurrentUser>,
) -> AppResult<Option<Profile>> {
    let Some(user) = user else {
        return Ok(None);
    };
    Ok(ProfileStore::new(state.backend.clone())
        .find_profile(&user.id)
        .await?)
}

/// GET /pods
pub async fn list_pods(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Json<Vec<PodView>>> {
    let profile = viewer_profile(&state, user.as_ref()).await?;
    let mut manager = PodMembershipManager::new(state.backend.clone(), profile);
    manager.list_pods().await?;

    let views = manager
        .pods()
        .iter()
        .map(|pod| PodView {
            is_member: manager.is_member(pod),
            pod: pod.clone(),
        })
        .collect();
    Ok(Json(views))
}

/// POST /pods
pub async fn create_pod(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreatePodRequest>,
) -> AppResult<(StatusCode, Json<PodView>)> {
    let profile = viewer_profile(&state, Some(&user)).await?;
    let mut manager = PodMembershipManager::new(state.backend.clone(), profile);
    let pod = manager
        .create_pod(&req.name, req.description.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PodView {
            pod,
            is_member: true,
        }),
    ))
}

/// POST /pods/{id}/join
pub async fn join_pod(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(pod_id): Path<PodId>,
) -> AppResult<Json<JoinResponse>> {
    let profile = viewer_profile(&state, Some(&user)).await?;
    let mut manager = PodMembershipManager::new(state.backend.clone(), profile);
    let outcome = manager.join_pod(&pod_id).await?;
    Ok(Json(JoinResponse { pod_id, outcome }))
}
