//! Record listing and review endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use spendguard_core::{
    RecordId, RecordStatus, RejectionReason, ReviewAction, SpendGuardError,
};
use spendguard_store::CachedRecord;

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma-separated statuses, e.g. `PENDING,FLAGGED`.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reasons: Vec<RejectionReason>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectionEmailRequest {
    /// Defaults to the submitter's display name.
    #[serde(default)]
    pub recipient: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectionEmailResponse {
    pub record_id: RecordId,
    pub recipient: String,
    pub email: String,
}

fn parse_statuses(raw: &str) -> Result<Vec<RecordStatus>, SpendGuardError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            RecordStatus::parse(s)
                .ok_or_else(|| SpendGuardError::Validation(format!("Unknown status '{s}'")))
        })
        .collect()
}

/// List the records the caller may see, newest first.
pub async fn list_records(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<CachedRecord>>> {
    let statuses = match query.status.as_deref() {
        Some(raw) => Some(parse_statuses(raw)?),
        None => None,
    };

    let entries = state
        .visible_entries(&user)
        .await
        .into_iter()
        .filter(|e| {
            statuses
                .as_ref()
                .map_or(true, |s| s.contains(&e.record.status()))
        })
        .collect();
    Ok(Json(entries))
}

/// Get one record.
pub async fn get_record(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CachedRecord>> {
    Ok(Json(state.record(&RecordId::new(id), &user).await?))
}

async fn review(
    state: &AppState,
    user: &spendguard_core::User,
    id: String,
    action: ReviewAction,
) -> ApiResult<Json<CachedRecord>> {
    let entry = state
        .review_desk
        .act(&RecordId::new(id), user, &action)
        .await?;
    Ok(Json(entry))
}

pub async fn validate_record(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CachedRecord>> {
    review(&state, &user, id, ReviewAction::Validate).await
}

pub async fn resolve_record(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CachedRecord>> {
    review(&state, &user, id, ReviewAction::Resolve).await
}

pub async fn reject_record(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<CachedRecord>> {
    let action = ReviewAction::Reject {
        reasons: req.reasons,
        notes: req.notes,
    };
    review(&state, &user, id, action).await
}

/// Draft an email telling the submitter why their record was rejected.
pub async fn draft_rejection_email(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Option<Json<RejectionEmailRequest>>,
) -> ApiResult<Json<RejectionEmailResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let record_id = RecordId::new(id);

    if !user.role.can_review() {
        return Err(SpendGuardError::Forbidden {
            action: "draft rejection email".to_string(),
            required: "reviewer".to_string(),
        }
        .into());
    }

    let record = state.record(&record_id, &user).await?.record;
    let Some(rejection) = record.rejection() else {
        return Err(SpendGuardError::InvalidTransition {
            record_id: record_id.to_string(),
            status: record.status(),
            action: "draft rejection email for".to_string(),
        }
        .into());
    };

    let mut reason = rejection
        .reasons
        .iter()
        .map(|r| r.label())
        .collect::<Vec<_>>()
        .join(", ");
    if let Some(notes) = &rejection.notes {
        reason.push_str(". Notes: ");
        reason.push_str(notes);
    }

    let recipient = request
        .recipient
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| record.submitted_by.display_name.clone());

    let email = state
        .provider
        .draft_rejection_email(&record.vendor, record.amount, &reason, &recipient)
        .await?;

    Ok(Json(RejectionEmailResponse {
        record_id,
        recipient,
        email,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statuses() {
        assert_eq!(
            parse_statuses("PENDING, FLAGGED").unwrap(),
            vec![RecordStatus::Pending, RecordStatus::Flagged]
        );
        assert!(parse_statuses("APPROVED").is_err());
    }
}
