use chrono::{Duration, Utc};
use rand::Rng;

use crate::backend::{DynBackend, UserId};
use crate::error::{PodError, PodResult};

/// Open a session for a user. Returns the session token.
pub async fn create_session(backend: &DynBackend, user_id: &UserId, hours: u64) -> PodResult<String> {
    let expires_at = i64::try_from(hours)
        .ok()
        .and_then(Duration::try_hours)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            PodError::InvalidInput(format!("Session lifetime of {hours} hours is out of range"))
        })?;
    let token = generate_token();

    backend
        .create_session(user_id, &token, expires_at)
        .await
        .map_err(PodError::write("session"))?;

    Ok(token)
}

/// Delete a session by token. Unknown tokens are ignored.
pub async fn delete_session(backend: &DynBackend, token: &str) -> PodResult<()> {
    backend
        .delete_session(token)
        .await
        .map_err(PodError::write("session"))
}

/// Generate a cryptographically random 32-byte hex token.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
