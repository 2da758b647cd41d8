use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use guardian_db::Database;
use guardian_llm::Generator;
use guardian_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};

use crate::analytics::SideEffects;
use crate::entitlement::EntitlementGate;
use crate::error::{ApiError, ValidJson, blocking};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub config: ApiConfig,
    pub generator: Arc<dyn Generator>,
    pub entitlement: Arc<dyn EntitlementGate>,
    pub side_effects: SideEffects,
}

/// Settings the handlers need; assembled by the server from its environment.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub max_dependents: u32,
    /// Cap on model/tool round trips per turn.
    pub max_steps: u32,
    pub chat_model: String,
    pub reasoning_model: String,
}

pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') || email.len() > 254 {
        return Err(ApiError::Validation("invalid email".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let account_id = Uuid::new_v4();
    let db = state.db.clone();
    let stored_email = email.clone();
    blocking(move || {
        let password_hash = hash_secret(&req.password)?;
        // The UNIQUE email decides between concurrent registrations.
        if !db.create_account(&account_id, &stored_email, &password_hash)? {
            return Err(ApiError::Conflict("email already registered".into()));
        }
        Ok(())
    })
    .await?;

    info!(account_id = %account_id, "Account registered");
    let token = create_token(&state.config, account_id, &email, None)?;

    Ok((StatusCode::CREATED, Json(AuthResponse { account_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let db = state.db.clone();
    let lookup = email.clone();
    let account = blocking(move || Ok(db.get_account_by_email(&lookup)?))
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    if !verify_secret(&account.password, &req.password) {
        return Err(ApiError::Unauthenticated);
    }

    let token = create_token(&state.config, account.id, &account.email, None)?;

    Ok(Json(AuthResponse {
        account_id: account.id,
        token,
    }))
}

/// Argon2id hash for passwords and PINs.
pub(crate) fn hash_secret(secret: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))
}

pub(crate) fn verify_secret(hash: &str, candidate: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn create_token(
    config: &ApiConfig,
    account_id: Uuid,
    email: &str,
    guardian_persona_id: Option<Uuid>,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: account_id,
        email: email.to_string(),
        guardian_persona_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(config.token_ttl_days)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}
