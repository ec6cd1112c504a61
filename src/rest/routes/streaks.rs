// rest/routes/streaks.rs — Streak REST routes.
//
// One resource path, four verbs. Each handler validates its input, makes
// one logical store call, and serializes the resulting record.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::storage::{StreakOverwrite, StreakType};
use crate::AppContext;

#[derive(Deserialize)]
pub struct StreakQuery {
    pub id: Option<String>,
}

/// Ids arrive as query-param strings or as JSON values that may quote the
/// number. A value that does not parse as an integer is rejected up front
/// rather than passed through as a lookup that can never match.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::Validation("ID must be an integer".to_string()))
}

/// Numeric creation fields accept JSON numbers or numeric strings; anything
/// else (including absence) falls back to zero rather than failing the
/// request.
fn coerce_f64(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn coerce_i64(v: Option<&Value>) -> i64 {
    match v {
        // Fractional values truncate toward zero rather than falling back.
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

// ─── GET ──────────────────────────────────────────────────────────────────────

pub async fn get_streaks(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<StreakQuery>,
) -> Result<Json<Value>, ApiError> {
    match q.id {
        Some(raw) => {
            let id = parse_id(&raw)?;
            let streak = ctx
                .storage
                .get_streak(id)
                .await
                .map_err(|e| ApiError::from_store(e, "Error fetching streak(s)"))?;
            Ok(Json(json!(streak)))
        }
        None => {
            let streaks = ctx
                .storage
                .list_streaks()
                .await
                .map_err(|e| ApiError::from_store(e, "Error fetching streak(s)"))?;
            Ok(Json(json!(streaks)))
        }
    }
}

// ─── POST ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreakRequest {
    pub title: Option<String>,
    pub streak_type: Option<String>,
    pub count: Option<Value>,
    pub streak_count: Option<Value>,
    pub average: Option<Value>,
    pub datatype: Option<String>,
}

pub async fn create_streak(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateStreakRequest>,
) -> Result<Json<Value>, ApiError> {
    let title = body.title.as_deref().filter(|t| !t.is_empty());
    let raw_type = body.streak_type.as_deref().filter(|t| !t.is_empty());
    let (Some(title), Some(raw_type)) = (title, raw_type) else {
        return Err(ApiError::Validation(
            "Title and Streak Type are required".to_string(),
        ));
    };
    let streak_type = StreakType::parse(raw_type).ok_or_else(|| {
        ApiError::Validation("streakType must be SIMPLE or COUNT".to_string())
    })?;

    let streak = ctx
        .storage
        .create_streak(
            title,
            streak_type,
            body.datatype.as_deref().unwrap_or("NONE"),
            coerce_f64(body.count.as_ref()),
            coerce_i64(body.streak_count.as_ref()),
            coerce_f64(body.average.as_ref()),
        )
        .await
        .map_err(|e| ApiError::from_store(e, "Error creating streak"))?;
    Ok(Json(json!(streak)))
}

// ─── PUT ──────────────────────────────────────────────────────────────────────

pub async fn replace_streak(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<StreakQuery>,
    Json(fields): Json<StreakOverwrite>,
) -> Result<Json<Value>, ApiError> {
    let raw = q
        .id
        .ok_or_else(|| ApiError::Validation("ID is required".to_string()))?;
    let id = parse_id(&raw)?;

    let streak = ctx
        .storage
        .replace_streak(id, &fields)
        .await
        .map_err(|e| ApiError::from_store(e, "Error updating streak"))?;
    Ok(Json(json!(streak)))
}

// ─── PATCH ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementStreakRequest {
    pub id: Option<Value>,
    pub new_count: Option<Value>,
}

pub async fn increment_streak(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<IncrementStreakRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = match &body.id {
        None | Some(Value::Null) => {
            return Err(ApiError::Validation("ID is required".to_string()))
        }
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ApiError::Validation("ID must be an integer".to_string()))?,
        Some(Value::String(s)) => parse_id(s)?,
        Some(_) => return Err(ApiError::Validation("ID must be an integer".to_string())),
    };

    // The delta is handed over raw; whether it is required, ignored, or
    // malformed depends on the record's type, which only the store knows.
    let streak = ctx
        .storage
        .increment_streak(id, body.new_count.as_ref())
        .await
        .map_err(|e| ApiError::from_store(e, "Error updating streak"))?;
    Ok(Json(json!(streak)))
}
