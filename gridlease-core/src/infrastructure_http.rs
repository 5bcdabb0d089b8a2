//! Remote document store speaking plain HTTP with ETags.
//!
//! `GET <url>` returns the document and its `ETag` (`404` = no document yet).
//! `PUT <url>` writes it back guarded by `If-Match` (or `If-None-Match: *`
//! for the first write); `412` or `409` means another writer got there first.
//!
//! Enable with the `http` feature flag.

use std::time::Duration;

use crate::error::{GridError, GridResult};
use crate::infrastructure::{CasOutcome, VersionedStore};
use crate::types::document;
use crate::types::{GridDims, GridSnapshot, Version};

pub struct HttpDocumentStore {
    agent: ureq::Agent,
    url: String,
    bearer: Option<String>,
    dims: GridDims,
    timeout: Duration,
}

impl HttpDocumentStore {
    pub fn new(url: impl Into<String>, dims: GridDims, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self {
            agent,
            url: url.into(),
            bearer: None,
            dims,
            timeout,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    fn authorize(&self, req: ureq::Request) -> ureq::Request {
        match &self.bearer {
            Some(token) => req.set("Authorization", &format!("Bearer {}", token)),
            None => req,
        }
    }

    fn map_transport(&self, err: ureq::Transport) -> GridError {
        let msg = err.to_string();
        if is_timeout(&err) {
            GridError::Timeout(self.timeout)
        } else {
            GridError::StoreUnavailable(format!("{}: {}", self.url, msg))
        }
    }
}

fn is_timeout(err: &ureq::Transport) -> bool {
    use std::error::Error as _;
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = e.source();
    }
    err.to_string().contains("timed out")
}

impl VersionedStore for HttpDocumentStore {
    fn read(&self) -> GridResult<(GridSnapshot, Version)> {
        let req = self
            .authorize(self.agent.get(&self.url))
            .set("Accept", "application/json")
            .set("Cache-Control", "no-store");

        match req.call() {
            Ok(resp) => {
                let version = resp
                    .header("ETag")
                    .map(Version::from_etag)
                    .ok_or_else(|| GridError::StoreUnavailable("response carried no ETag".into()))?;
                let body = resp
                    .into_string()
                    .map_err(|e| GridError::StoreUnavailable(format!("read body: {}", e)))?;
                let snapshot = document::decode(Some(&body), self.dims)?;
                Ok((snapshot, version))
            }
            Err(ureq::Error::Status(404, _)) => Ok((GridSnapshot::new(), Version::initial())),
            Err(ureq::Error::Status(code, _)) => Err(GridError::StoreUnavailable(format!(
                "GET {} returned {}",
                self.url, code
            ))),
            Err(ureq::Error::Transport(t)) => Err(self.map_transport(t)),
        }
    }

    fn compare_and_swap(&self, snapshot: &GridSnapshot, expected: &Version) -> GridResult<CasOutcome> {
        let body = document::encode(snapshot)?;
        let mut req = self
            .authorize(self.agent.put(&self.url))
            .set("Content-Type", "application/json");
        req = if expected.is_initial() {
            req.set("If-None-Match", "*")
        } else {
            req.set("If-Match", &expected.etag())
        };

        match req.send_string(&body) {
            Ok(resp) => match resp.header("ETag") {
                Some(tag) => Ok(CasOutcome::Committed(Version::from_etag(tag))),
                // Written, but the new version is unknown; the next read picks it up
                None => Ok(CasOutcome::Committed(Version::initial())),
            },
            Err(ureq::Error::Status(409 | 412, _)) => Ok(CasOutcome::Conflict),
            Err(ureq::Error::Status(code, _)) => Err(GridError::StoreUnavailable(format!(
                "PUT {} returned {}",
                self.url, code
            ))),
            Err(ureq::Error::Transport(t)) => Err(self.map_transport(t)),
        }
    }

    fn describe(&self) -> String {
        format!("http ({})", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_parsing_strips_quotes_and_weak_prefix() {
        assert_eq!(Version::from_etag("\"42\""), Version::new("42"));
        assert_eq!(Version::from_etag("W/\"abc\""), Version::new("abc"));
        assert_eq!(Version::from_etag("7"), Version::new("7"));
        assert_eq!(Version::from_etag(&Version::new("9").etag()), Version::new("9"));
    }
}
