//! Request handlers.

use super::{ApiError, ApiResult, AppState};
use crate::identity::{Resolution, UNBOUND_REASON};
use crate::ledger::{commit_digest, compute_id};
use crate::pipeline::Outcome;
use crate::primitives::{Address, ContributionId, PayoutMode, RewardAmount, TxHash};
use crate::reconcile::ClaimConfirmation;
use crate::store::RepoSchema;
use crate::webhook::{
    is_valid_repo, PullRequestEvent, DELIVERY_HEADER, DEV_BYPASS_HEADER, EVENT_HEADER,
    PULL_REQUEST_EVENT, SIGNATURE_HEADER,
};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn parse_id(raw: &str) -> ApiResult<ContributionId> {
    let raw = raw.trim();
    if !raw.starts_with("0x") && !raw.starts_with("0X") {
        return Err(ApiError::BadId(format!("id must be 0x-prefixed: {raw}")));
    }
    raw.parse().map_err(|e: crate::Error| ApiError::BadId(e.to_string()))
}

/// Addresses in queries are matched case-insensitively, so a mixed-case
/// value with a broken checksum still finds its rows.
fn parse_address_loose(raw: &str) -> ApiResult<Address> {
    raw.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|e: crate::Error| ApiError::BadRequest(e.to_string()))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::Disabled);
    };
    let presented = header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "ts": Utc::now().timestamp_millis() }))
}

/// `POST /webhook`
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let auth = state.authenticator.authenticate(
        &body,
        header_str(&headers, SIGNATURE_HEADER),
        header_str(&headers, DEV_BYPASS_HEADER),
    );
    if !auth.is_accepted() {
        return Err(ApiError::InvalidSignature);
    }

    let event_type = header_str(&headers, EVENT_HEADER).unwrap_or("unknown");
    let delivery = header_str(&headers, DELIVERY_HEADER).unwrap_or("-");
    if event_type != PULL_REQUEST_EVENT {
        debug!("Ignoring {event_type} delivery {delivery}");
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "received": true, "event": event_type })),
        )
            .into_response());
    }

    let event = PullRequestEvent::from_json(&body).map_err(|e| {
        warn!("Rejecting delivery {delivery}: {e}");
        ApiError::BadPayload(e.to_string())
    })?;
    debug!(
        "Delivery {delivery}: {} {}#{} ({auth:?})",
        event.action, event.repo, event.pr_number
    );

    let response = match state.pipeline.process(&event).await? {
        Outcome::PolicyRejected(decision) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "received": true,
                "accepted": false,
                "reasons": decision.reason_codes(),
            })),
        ),
        Outcome::Unbound { author } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "received": true,
                "accepted": false,
                "reasons": [UNBOUND_REASON],
                "author": author,
            })),
        ),
        Outcome::Registered { contribution, .. } => (
            StatusCode::CREATED,
            Json(json!({
                "accepted": true,
                "id": contribution.id,
                "repo": contribution.repo,
                "commitHash": contribution.commit_hash,
                "beneficiary": contribution.beneficiary,
                "evidenceURI": contribution.evidence_uri,
                "reward": contribution.reward,
                "payoutMode": contribution.payout_mode,
                "txHash": contribution.ledger_tx_hash,
            })),
        ),
    };
    Ok(response.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    beneficiary: Option<String>,
    limit: Option<String>,
}

/// `GET /contributions?beneficiary=&limit=`
pub async fn list_contributions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let beneficiary = query
        .beneficiary
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("beneficiary is required".to_string()))?;
    let beneficiary = parse_address_loose(beneficiary)?;
    let limit = query
        .limit
        .as_deref()
        .and_then(|l| l.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_PAGE)
        .clamp(1, MAX_PAGE);

    let items = state
        .pipeline
        .store()
        .find_by_beneficiary(&beneficiary, limit)
        .await?;
    Ok(Json(json!({ "items": items })))
}

/// `GET /contributions/:id`
pub async fn get_contribution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_id(&id)?;
    let contribution = state
        .pipeline
        .store()
        .find_by_id(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(json!(contribution)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimMarkRequest {
    id: String,
    tx_hash: Option<String>,
}

/// `POST /claim/mark`
pub async fn mark_claim(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let request: ClaimMarkRequest = parse_json(&body)?;
    let id = parse_id(&request.id)?;
    let claim_tx = request
        .tx_hash
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(str::parse::<TxHash>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("bad txHash: {e}")))?;

    if !state.reconciler.is_active() {
        return Err(ApiError::ChainUnavailable);
    }

    let response = match state.reconciler.confirm_claim(&id, claim_tx).await {
        Ok(ClaimConfirmation::Claimed) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "claimed": true })),
        ),
        Ok(ClaimConfirmation::NotClaimed) => (
            StatusCode::ACCEPTED,
            Json(json!({ "ok": false, "claimed": false })),
        ),
        Err(crate::Error::Ledger(e) | crate::Error::Network(e)) => {
            warn!("Claim confirmation for {id} failed: {e}");
            return Err(ApiError::ChainUnavailable);
        }
        Err(e) => return Err(e.into()),
    };
    Ok(response.into_response())
}

#[derive(Debug, Deserialize)]
pub struct RepoQuery {
    repo: Option<String>,
}

/// `GET /repos/schema?repo=`
pub async fn get_repo_schema(
    State(state): State<AppState>,
    Query(query): Query<RepoQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = query
        .repo
        .as_deref()
        .map(str::trim)
        .filter(|r| is_valid_repo(r))
        .ok_or_else(|| ApiError::BadRequest("repo must be owner/name".to_string()))?;
    let schema = state.pipeline.store().get_repo_schema(repo).await?;
    Ok(Json(json!({ "schema": schema })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoSchemaRequest {
    repo: String,
    #[serde(default)]
    min_loc: Option<u64>,
    payout_mode: String,
    reward: String,
    #[serde(default)]
    token_address: Option<String>,
    #[serde(default)]
    updated_by: Option<String>,
}

impl RepoSchemaRequest {
    fn into_schema(self, default_min_loc: u64) -> ApiResult<RepoSchema> {
        let repo = self.repo.trim().to_string();
        if !is_valid_repo(&repo) {
            return Err(ApiError::BadRequest("repo must be owner/name".to_string()));
        }
        let payout_mode: PayoutMode = self.payout_mode.parse()?;
        let reward: RewardAmount = self.reward.parse()?;
        let token_address = self
            .token_address
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(str::parse::<Address>)
            .transpose()?
            .filter(|a| !a.is_zero());

        match (payout_mode, token_address) {
            (PayoutMode::Erc20, None) => {
                return Err(ApiError::BadRequest(
                    "tokenAddress is required for ERC20 payouts".to_string(),
                ))
            }
            (PayoutMode::Native, Some(_)) => {
                return Err(ApiError::BadRequest(
                    "tokenAddress must be empty for NATIVE payouts".to_string(),
                ))
            }
            _ => {}
        }

        Ok(RepoSchema {
            repo,
            min_loc: self.min_loc.unwrap_or(default_min_loc),
            payout_mode,
            reward,
            token_address,
            updated_by: self.updated_by,
            updated_at: Utc::now(),
        })
    }
}

/// `PUT /admin/repos/schema`
pub async fn put_repo_schema(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let request: RepoSchemaRequest = parse_json(&body)?;
    let default_min_loc = state.pipeline.payout_terms(&request.repo).await.min_loc;
    let schema = request.into_schema(default_min_loc)?;
    state.pipeline.store().upsert_repo_schema(&schema).await?;
    info!(
        "Repo schema for {} set to {} reward {} (min_loc={})",
        schema.repo, schema.payout_mode, schema.reward, schema.min_loc
    );
    Ok(Json(json!({ "ok": true, "schema": schema })))
}

#[derive(Debug, Deserialize)]
struct BindingRequest {
    handle: String,
    address: String,
}

/// `POST /admin/bindings`
pub async fn bind_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let request: BindingRequest = parse_json(&body)?;
    let address: Address = request.address.parse()?;
    state
        .pipeline
        .identity()
        .bind(&request.handle, &address)
        .await?;
    info!("Bound {} to {address}", request.handle.trim());
    Ok(Json(json!({
        "ok": true,
        "handle": request.handle.trim(),
        "address": address,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct BackfillRequest {
    #[serde(default)]
    limit: Option<usize>,
}

/// `POST /admin/reconcile/backfill`
pub async fn run_backfill(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let request: BackfillRequest = if body.is_empty() {
        BackfillRequest::default()
    } else {
        parse_json(&body)?
    };
    if !state.reconciler.is_active() {
        return Err(ApiError::ChainUnavailable);
    }
    let limit = request
        .limit
        .unwrap_or(state.backfill_batch)
        .clamp(1, MAX_PAGE);
    let report = state.reconciler.backfill(limit).await?;
    Ok(Json(json!(report)))
}

#[derive(Debug, Deserialize)]
struct ClaimSyncRequest {
    beneficiary: String,
}

/// `POST /admin/reconcile/claims`
pub async fn run_claim_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let request: ClaimSyncRequest = parse_json(&body)?;
    let beneficiary = parse_address_loose(&request.beneficiary)?;
    if !state.reconciler.is_active() {
        return Err(ApiError::ChainUnavailable);
    }
    let report = state.reconciler.sync_claims(&beneficiary).await?;
    Ok(Json(json!(report)))
}

#[derive(Debug, Deserialize)]
pub struct InspectQuery {
    repo: Option<String>,
    commit: Option<String>,
    author: Option<String>,
}

/// `GET /admin/inspect?repo=&commit=&author=`
pub async fn inspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<InspectQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let repo = query
        .repo
        .as_deref()
        .map(str::trim)
        .filter(|r| is_valid_repo(r))
        .ok_or_else(|| ApiError::BadRequest("repo must be owner/name".to_string()))?;
    let commit = query
        .commit
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("commit is required".to_string()))?;

    let commit_hash = commit_digest(commit);
    let id = compute_id(repo, &commit_hash);
    let binding = match state
        .pipeline
        .identity()
        .resolve(query.author.as_deref())
        .await?
    {
        Resolution::Bound(address) => Some(address),
        Resolution::Unbound => None,
    };
    let contribution = state.pipeline.store().find_by_id(&id).await?;
    let ledger = match state.pipeline.registrar().status(&id).await {
        Ok(status) => status,
        Err(e) => {
            debug!("Ledger status for {id} unavailable: {e}");
            None
        }
    };

    Ok(Json(json!({
        "id": id,
        "commitHash": commit_hash,
        "author": query.author,
        "boundAddress": binding,
        "registered": contribution.is_some(),
        "onChain": contribution.as_ref().is_some_and(|c| c.ledger_tx_hash.is_some()),
        "claimed": contribution.as_ref().is_some_and(|c| c.claimed),
        "ledger": ledger.map(|s| json!({ "registered": s.registered, "claimed": s.claimed })),
        "contribution": contribution,
    })))
}
