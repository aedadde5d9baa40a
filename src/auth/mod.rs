// Identity - email/password accounts and opaque session tokens
pub mod session;

use crate::backend::{BackendError, DynBackend, UserId};
use crate::error::{PodError, PodResult};

pub use session::generate_token;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Hashing cost and session lifetime, taken from the `[auth]` config section.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    pub bcrypt_cost: u32,
    pub session_hours: u64,
}

fn normalize_email(email: &str) -> PodResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(PodError::InvalidInput("A valid email is required".into()));
    }
    Ok(email)
}

/// Create an account and sign it in. Returns the new identity and its
/// session token.
pub async fn sign_up(
    backend: &DynBackend,
    email: &str,
    password: &str,
    creds: Credentials,
) -> PodResult<(UserId, String)> {
    let email = normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PodError::InvalidInput(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let hash = bcrypt::hash(password, creds.bcrypt_cost)?;
    let user = backend
        .insert_user(&email, &hash)
        .await
        .map_err(|e| match e {
            BackendError::Conflict(_) => PodError::InvalidInput("Email is already registered".into()),
            other => PodError::write("account")(other),
        })?;

    let token = session::create_session(backend, &user.id, creds.session_hours).await?;
    tracing::info!(user_id = %user.id, "account created");
    Ok((user.id, token))
}

/// Unknown email and wrong password fail the same way.
pub async fn sign_in(
    backend: &DynBackend,
    email: &str,
    password: &str,
    creds: Credentials,
) -> PodResult<(UserId, String)> {
    let email = normalize_email(email).map_err(|_| PodError::Unauthenticated)?;
    let user = backend
        .user_by_email(&email)
        .await
        .map_err(PodError::fetch("account"))?
        .ok_or(PodError::Unauthenticated)?;

    if !bcrypt::verify(password, &user.password_hash).unwrap_or(false) {
        tracing::warn!(user_id = %user.id, "sign-in rejected");
        return Err(PodError::Unauthenticated);
    }

    let token = session::create_session(backend, &user.id, creds.session_hours).await?;
    tracing::info!(user_id = %user.id, "signed in");
    Ok((user.id, token))
}

pub async fn sign_out(backend: &DynBackend, token: &str) -> PodResult<()> {
    session::delete_session(backend, token).await
}

/// The identity behind a live session, if any.
pub async fn current_identity(backend: &DynBackend, token: &str) -> PodResult<Option<UserId>> {
    backend
        .session_user(token)
        .await
        .map_err(PodError::fetch("session"))
}
