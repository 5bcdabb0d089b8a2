//! Blocking client for a running `gridlease serve`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use gridlease_core::state::{FinalizeOutcome, ReserveOutcome, UnlockOutcome};
use gridlease_core::types::{CellId, GridSnapshot, SalePayload};
use gridlease_core::{GridError, GridResult, ReservationApi};

use crate::handlers::*;

pub struct RemoteGridApi {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteGridApi {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let req = self
            .agent
            .request(method, &format!("{}{}", self.base_url, path))
            .set("Accept", "application/json");
        match &self.api_key {
            Some(key) => req.set("Authorization", &format!("Bearer {}", key)),
            None => req,
        }
    }

    fn call<T: DeserializeOwned>(&self, method: &str, path: &str, body: Option<&impl Serialize>) -> GridResult<T> {
        let req = self.request(method, path);
        let result = match body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };

        let resp = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => return Err(status_error(code, resp)),
            Err(ureq::Error::Transport(t)) => {
                let msg = t.to_string();
                return Err(if msg.contains("timed out") {
                    GridError::Timeout(self.timeout)
                } else {
                    GridError::StoreUnavailable(format!("{}: {}", self.base_url, msg))
                });
            }
        };

        let parsed: ApiResponse<T> = resp
            .into_json()
            .map_err(|e| GridError::StoreUnavailable(format!("invalid response from {}: {}", path, e)))?;
        parsed
            .data
            .ok_or_else(|| GridError::StoreUnavailable(format!("{} returned no data", path)))
    }

    pub fn status_full(&self) -> GridResult<StatusResponse> {
        self.call("GET", "/status", None::<&()>)
    }

    pub fn health(&self) -> GridResult<HealthResponse> {
        self.call("GET", "/health", None::<&()>)
    }

    pub fn set_asset_url(&self, region_id: &str, url: &str) -> GridResult<AssetResponse> {
        let path = format!("/regions/{}/asset", region_id);
        self.call("POST", &path, Some(&AssetRequest { url: url.to_string() }))
    }

    pub fn prune(&self) -> GridResult<PruneResponse> {
        self.call("POST", "/prune", None::<&()>)
    }
}

/// Rebuild a typed error from a non-2xx reply. The server's message is kept,
/// and 503 stays a retryable store error.
pub(crate) fn status_error(code: u16, resp: ureq::Response) -> GridError {
    let msg = resp
        .into_json::<ApiResponse<serde_json::Value>>()
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_else(|| format!("HTTP {}", code));
    match code {
        400 => GridError::Validation(msg),
        401 => GridError::StoreUnavailable(format!("unauthorized: {}", msg)),
        404 => GridError::UnknownRegion(msg),
        500 => GridError::MalformedDocument(msg),
        _ => GridError::StoreUnavailable(msg),
    }
}

impl ReservationApi for RemoteGridApi {
    fn status(&self) -> GridResult<GridSnapshot> {
        let status = self.status_full()?;
        Ok(GridSnapshot {
            sold: status.sold,
            locks: status.locks,
            regions: status.regions,
        })
    }

    fn reserve(&self, owner_id: &str, cells: &[CellId], ttl_ms: u64) -> GridResult<ReserveOutcome> {
        let req = ReserveRequest {
            owner_id: owner_id.to_string(),
            cells: cells.to_vec(),
            ttl_ms: Some(ttl_ms),
        };
        self.call("POST", "/reserve", Some(&req))
    }

    fn unlock(&self, owner_id: &str, cells: &[CellId]) -> GridResult<UnlockOutcome> {
        let req = UnlockRequest {
            owner_id: owner_id.to_string(),
            cells: cells.to_vec(),
        };
        self.call("POST", "/unlock", Some(&req))
    }

    fn finalize(&self, owner_id: &str, cells: &[CellId], payload: &SalePayload) -> GridResult<FinalizeOutcome> {
        let req = FinalizeRequest {
            owner_id: owner_id.to_string(),
            cells: cells.to_vec(),
            payload: payload.clone(),
        };
        self.call("POST", "/finalize", Some(&req))
    }
}
