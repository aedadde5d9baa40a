// Profile store adapter - one profile per authenticated identity
use crate::backend::{BackendError, DynBackend, Profile, ProfileFields, UserId};
use crate::error::{PodError, PodResult};

#[derive(Clone)]
pub struct ProfileStore {
    backend: DynBackend,
}

impl ProfileStore {
    pub fn new(backend: DynBackend) -> Self {
        Self { backend }
    }

    pub async fn get_profile(&self, user_id: &UserId) -> PodResult<Profile> {
        self.find_profile(user_id)
            .await?
            .ok_or(PodError::NotFound("Profile"))
    }

    /// Like `get_profile`, but absence is not an error.
    pub async fn find_profile(&self, user_id: &UserId) -> PodResult<Option<Profile>> {
        self.backend
            .profile_by_user(user_id)
            .await
            .map_err(PodError::fetch("profile"))
    }

    /// Uniqueness of the username is left to the backend.
    pub async fn create_profile(&self, user_id: &UserId, fields: ProfileFields) -> PodResult<Profile> {
        let fields = validate(fields)?;
        let profile = self
            .backend
            .insert_profile(user_id, fields)
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %user_id, "profile insert failed: {}", e);
                PodError::write("profile")(e)
            })?;

        tracing::info!(profile_id = %profile.id, username = %profile.username, "profile created");
        Ok(profile)
    }

    /// Only the owning identity can reach its own row, so no ownership check
    /// beyond the `user_id` key is needed.
    pub async fn update_profile(&self, user_id: &UserId, fields: ProfileFields) -> PodResult<Profile> {
        let fields = validate(fields)?;
        self.backend
            .update_profile(user_id, fields)
            .await
            .map_err(|e| match e {
                BackendError::NotFound(_) => PodError::NotFound("Profile"),
                other => PodError::write("profile")(other),
            })
    }
}

fn validate(fields: ProfileFields) -> PodResult<ProfileFields> {
    let fields = fields.normalized();
    if fields.username.is_empty() {
        return Err(PodError::InvalidInput("Username is required".into()));
    }
    Ok(fields)
}
