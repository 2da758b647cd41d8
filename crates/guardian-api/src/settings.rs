use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use guardian_guardrail::{Guardrail, Verdict};
use guardian_types::api::{
    AddBlacklistWordRequest, Claims, UpdateSettingsRequest, ValidateMessageRequest, ValidateMessageResponse,
};
use guardian_types::models::ModerationSettings;

use crate::auth::AppState;
use crate::error::{ApiError, ValidJson, blocking};
use crate::personas::authorize_dependent;

const MAX_WORD_LEN: usize = 64;

/// Stored settings, or the conservative defaults a first message would apply.
pub async fn get_settings(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let settings = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        Ok(db
            .get_settings(&dependent_id)?
            .unwrap_or_else(|| ModerationSettings::conservative(dependent_id)))
    })
    .await?;

    Ok(Json(settings))
}

/// Merge a partial update over the current settings.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let settings = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        let mut settings = db
            .get_settings(&dependent_id)?
            .unwrap_or_else(|| ModerationSettings::conservative(dependent_id));

        if let Some(level) = req.topic_restriction_level {
            settings.topic_restriction_level = level;
        }
        if let Some(level) = req.violence_level {
            settings.violence_level = level;
        }
        if let Some(level) = req.politics_level {
            settings.politics_level = level;
        }
        if let Some(on) = req.homework_mode_only {
            settings.homework_mode_only = on;
        }
        if let Some(on) = req.word_filter_enabled {
            settings.word_filter_enabled = on;
        }

        db.upsert_settings(&settings)?;
        Ok(settings)
    })
    .await?;

    info!(persona_id = %dependent_id, "Moderation settings updated");
    Ok(Json(settings))
}

pub async fn list_blacklist(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let entries = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        Ok(db.list_blacklist(&dependent_id)?)
    })
    .await?;

    Ok(Json(entries))
}

pub async fn add_blacklist_word(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<AddBlacklistWordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let word = req.word.trim().to_string();
    if word.is_empty() || word.chars().count() > MAX_WORD_LEN {
        return Err(ApiError::Validation(format!("word must be 1-{} characters", MAX_WORD_LEN)));
    }

    let db = state.db.clone();
    let entry = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        Ok(db.add_blacklist_word(&Uuid::new_v4(), &dependent_id, &word)?)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn remove_blacklist_word(
    State(state): State<AppState>,
    Path((dependent_id, entry_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        if db.remove_blacklist_word(&dependent_id, &entry_id)? {
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Run the pre-filter without storing anything.
pub async fn validate_message(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<ValidateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let guardrail = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        let settings = db
            .get_settings(&dependent_id)?
            .unwrap_or_else(|| ModerationSettings::conservative(dependent_id));
        let blacklist = db.list_blacklist(&dependent_id)?.into_iter().map(|e| e.word).collect();
        Ok(Guardrail::new(settings, blacklist))
    })
    .await?;

    let response = match guardrail.check_user_message(&req.message) {
        Verdict::Allowed => ValidateMessageResponse {
            allowed: true,
            reason: None,
            matched_term: None,
        },
        Verdict::Blocked(detection) => ValidateMessageResponse {
            allowed: false,
            reason: Some(detection.reason),
            matched_term: Some(detection.matched),
        },
    };
    Ok(Json(response))
}
