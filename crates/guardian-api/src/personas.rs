use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use guardian_db::{CreateDependentOutcome, Database};
use guardian_types::api::{
    Claims, CreateDependentRequest, OpenSessionRequest, PersonaSummary, SessionResponse, SetPinRequest,
};
use guardian_types::models::{Persona, PersonaType};

use crate::auth::{AppState, create_token, hash_secret, verify_secret};
use crate::error::{ApiError, ValidJson, blocking};
use crate::middleware::active_guardian;

const MAX_DISPLAY_NAME: usize = 50;

/// Check that the credential's guardian persona owns `dependent_id`.
/// Runs against the store on every call; nothing is cached between requests.
pub fn authorize_dependent(db: &Database, claims: &Claims, dependent_id: &Uuid) -> Result<(), ApiError> {
    let guardian_id = active_guardian(claims)?;
    if db.authorize_dependent_access(dependent_id, &guardian_id, &claims.sub)? {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub async fn list_personas(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let account_id = claims.sub;
    let personas = blocking(move || {
        db.ensure_guardian(&account_id, &Uuid::new_v4())?;
        Ok(db.list_personas(&account_id)?)
    })
    .await?;

    Ok(Json(personas.iter().map(summary).collect::<Vec<_>>()))
}

pub async fn create_dependent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<CreateDependentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let guardian_id = active_guardian(&claims)?;

    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME {
        return Err(ApiError::Validation(format!(
            "display_name must be 1-{} characters",
            MAX_DISPLAY_NAME
        )));
    }
    if let Some(pin) = &req.pin {
        validate_pin(pin)?;
    }

    let db = state.db.clone();
    let account_id = claims.sub;
    let max = state.config.max_dependents;
    let outcome = blocking(move || {
        let pin_hash = req.pin.as_deref().map(hash_secret).transpose()?;
        Ok(db.create_dependent(
            &Uuid::new_v4(),
            &account_id,
            &guardian_id,
            &display_name,
            req.avatar.as_deref(),
            pin_hash.as_deref(),
            max,
        )?)
    })
    .await?;

    match outcome {
        CreateDependentOutcome::Created(persona) => {
            info!(persona_id = %persona.id, account_id = %account_id, "Dependent created");
            Ok((StatusCode::CREATED, Json(summary(&persona))))
        }
        CreateDependentOutcome::LimitReached => Err(ApiError::LimitReached(format!(
            "an account can have at most {} dependents",
            max
        ))),
        CreateDependentOutcome::InvalidGuardian => Err(ApiError::Forbidden),
    }
}

/// Issue a token that carries the guardian persona as its active context.
pub async fn open_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<OpenSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let persona_id = req.persona_id;
    let persona = blocking(move || Ok(db.get_persona(&persona_id)?))
        .await?
        .ok_or(ApiError::Forbidden)?;

    if persona.kind != PersonaType::Guardian || persona.account_id != claims.sub {
        return Err(ApiError::Forbidden);
    }
    if let Some(pin_hash) = &persona.pin_hash {
        let pin = req.pin.as_deref().ok_or(ApiError::Forbidden)?;
        if !verify_secret(pin_hash, pin) {
            return Err(ApiError::Forbidden);
        }
    }

    let token = create_token(&state.config, claims.sub, &claims.email, Some(persona.id))?;
    Ok(Json(SessionResponse {
        guardian_persona_id: persona.id,
        token,
    }))
}

pub async fn set_pin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<SetPinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let guardian_id = active_guardian(&claims)?;
    validate_pin(&req.pin)?;

    let db = state.db.clone();
    let account_id = claims.sub;
    blocking(move || {
        // The claim is re-checked against the directory before writing.
        match db.get_persona(&guardian_id)? {
            Some(p) if p.kind == PersonaType::Guardian && p.account_id == account_id => {}
            _ => return Err(ApiError::Forbidden),
        }
        let pin_hash = hash_secret(&req.pin)?;
        db.set_pin_hash(&guardian_id, &pin_hash)?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn validate_pin(pin: &str) -> Result<(), ApiError> {
    if (4..=8).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ApiError::Validation("pin must be 4-8 digits".into()))
    }
}

fn summary(persona: &Persona) -> PersonaSummary {
    PersonaSummary {
        id: persona.id,
        display_name: persona.display_name.clone(),
        kind: persona.kind,
        avatar: persona.avatar.clone(),
        needs_pin: persona.kind == PersonaType::Guardian && persona.pin_hash.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_are_short_digit_strings() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("12345678").is_ok());
        assert!(validate_pin("123").is_err());
        assert!(validate_pin("123456789").is_err());
        assert!(validate_pin("12a4").is_err());
        assert!(validate_pin("١٢٣٤").is_err());
    }
}
