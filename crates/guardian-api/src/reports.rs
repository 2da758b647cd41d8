//! Read-only views for the guardian: flags, usage, conversations.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use guardian_types::api::{Claims, ConversationSummary, ReportQuery, UsageReportResponse};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::personas::authorize_dependent;

const DEFAULT_REPORT_DAYS: i64 = 7;
const TOP_TOPICS: usize = 5;

pub async fn list_flags(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let flags = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        Ok(db.list_flags(&dependent_id)?)
    })
    .await?;

    Ok(Json(flags))
}

pub async fn usage_report(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let to = query.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = query
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_REPORT_DAYS - 1));
    if from > to {
        return Err(ApiError::Validation("from must not be after to".into()));
    }

    let db = state.db.clone();
    let report = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        Ok(UsageReportResponse {
            persona_id: dependent_id,
            from,
            to,
            usage: db.sum_usage(&dependent_id, from, to)?,
            flags: db.count_flags_between(&dependent_id, from, to)?,
            top_topics: db.top_topics(&dependent_id, from, to, TOP_TOPICS)?,
        })
    })
    .await?;

    Ok(Json(report))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Path(dependent_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let conversations = blocking(move || {
        authorize_dependent(&db, &claims, &dependent_id)?;
        Ok(db.list_conversations(&dependent_id)?)
    })
    .await?;

    let summaries: Vec<ConversationSummary> = conversations
        .into_iter()
        .map(|c| ConversationSummary {
            id: c.id,
            title: c.title,
            created_at: c.created_at,
        })
        .collect();
    Ok(Json(summaries))
}
