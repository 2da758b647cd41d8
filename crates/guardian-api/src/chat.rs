use std::convert::Infallible;

use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::info;
use uuid::Uuid;

use guardian_types::api::{Claims, DeleteConversationQuery, SendMessageRequest};

use crate::auth::AppState;
use crate::error::{ApiError, ValidJson, blocking};
use crate::orchestrator::{self, Admission};
use crate::personas::authorize_dependent;

/// Either a JSON "blocked" envelope or an NDJSON stream of [`ChatEvent`]s.
///
/// [`ChatEvent`]: guardian_types::events::ChatEvent
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<SendMessageRequest>,
) -> Result<Response, ApiError> {
    match orchestrator::admit(&state, &claims, req).await? {
        Admission::Blocked(blocked) => Ok(Json(blocked).into_response()),
        Admission::Allowed(turn) => {
            let mut rx = orchestrator::run_turn(state.clone(), turn);
            let stream = async_stream::stream! {
                while let Some(event) = rx.recv().await {
                    yield Ok::<_, Infallible>(event.to_line());
                }
            };

            Response::builder()
                .header(header::CONTENT_TYPE, "application/x-ndjson")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(stream))
                .map_err(|e| ApiError::Internal(e.into()))
        }
    }
}

/// Soft delete. Messages and flags stay for the guardian's audit trail.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<DeleteConversationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let persona_id = query.persona_id;
    blocking(move || {
        authorize_dependent(&db, &claims, &persona_id)?;

        let conversation = db.get_conversation(&conversation_id)?.ok_or(ApiError::NotFound)?;
        if conversation.persona_id != persona_id {
            return Err(ApiError::Forbidden);
        }
        if !db.soft_delete_conversation(&conversation_id)? {
            return Err(ApiError::NotFound);
        }
        Ok(())
    })
    .await?;

    info!(conversation_id = %conversation_id, persona_id = %persona_id, "Conversation deleted");
    Ok(StatusCode::OK)
}
