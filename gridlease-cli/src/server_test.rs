#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt; // oneshot

    use gridlease_core::clock::ManualClock;
    use gridlease_core::config::GridConfig;
    use gridlease_core::infrastructure_in_memory::InMemoryGridStore;
    use gridlease_core::GridClient;

    use crate::server::{build_router, create_client, AppContext, AppState};

    fn make_state(api_key: Option<&str>) -> AppState {
        let client = GridClient::with_store(
            Arc::new(InMemoryGridStore::new()),
            Arc::new(ManualClock::new(1_000_000)),
            GridConfig::default(),
        );
        Arc::new(AppContext {
            client,
            api_key: api_key.map(str::to_string),
        })
    }

    async fn call(state: &AppState, req: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
        let resp = build_router(state.clone(), 16).oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_open_but_status_needs_key() {
        let state = make_state(Some("secret"));

        let (status, _, body) = call(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["data"]["status"], "ok");

        let (status, _, _) = call(&state, get("/status")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/status")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = call(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["data"]["stats"]["free"], 10_000);
    }

    #[tokio::test]
    async fn test_reserve_grants_then_conflicts() {
        let state = make_state(None);

        let (status, _, body) = call(
            &state,
            post("/reserve", serde_json::json!({"owner_id": "u1", "cells": [0, 1, 2], "ttl_ms": 60000})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["granted"], serde_json::json!([0, 1, 2]));
        assert_eq!(body["data"]["expires_at"], 1_060_000);

        // No ttl_ms: the server default applies
        let (status, _, body) = call(
            &state,
            post("/reserve", serde_json::json!({"owner_id": "u2", "cells": [2, 3]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["data"]["granted"], serde_json::json!([3]));
        assert_eq!(body["data"]["conflicted"], serde_json::json!([2]));
        assert_eq!(body["data"]["expires_at"], 1_180_000);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_400() {
        let state = make_state(None);

        let (status, _, body) = call(&state, post("/reserve", serde_json::json!({"owner_id": "u1", "cells": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["success"], false);

        let (status, _, body) = call(
            &state,
            post("/reserve", serde_json::json!({"owner_id": "u1", "cells": [10000]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["retryable"], false);

        let (status, _, _) = call(
            &state,
            post(
                "/finalize",
                serde_json::json!({"owner_id": "u1", "cells": [1], "payload": {"name": "x", "link": "ftp://x"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_finalize_and_link_asset() {
        let state = make_state(None);

        let (status, _, body) = call(
            &state,
            post(
                "/finalize",
                serde_json::json!({"owner_id": "u1", "cells": [0, 1], "payload": {"name": "Ada", "link": "https://a"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["data"]["committed"], serde_json::json!([0, 1]));
        let region_id = body["data"]["region_id"].as_str().unwrap().to_string();

        let (status, _, body) = call(
            &state,
            post(
                &format!("/regions/{}/asset", region_id),
                serde_json::json!({"url": "https://cdn.example/a.png"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["data"]["asset_url"], "https://cdn.example/a.png");

        let (status, _, body) = call(
            &state,
            post("/regions/nope/asset", serde_json::json!({"url": "https://cdn.example/a.png"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["success"], false);

        let (_, _, body) = call(
            &state,
            post("/reserve", serde_json::json!({"owner_id": "u2", "cells": [0]})),
        )
        .await;
        assert_eq!(json(&body)["data"]["conflicted"], serde_json::json!([0]));
    }

    #[tokio::test]
    async fn test_unlock_and_prune() {
        let state = make_state(None);
        call(&state, post("/reserve", serde_json::json!({"owner_id": "u1", "cells": [5]}))).await;

        let (status, _, body) = call(&state, post("/unlock", serde_json::json!({"owner_id": "u2", "cells": [5]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["data"]["released"], serde_json::json!([]));

        let (_, _, body) = call(&state, post("/unlock", serde_json::json!({"owner_id": "u1", "cells": [5]}))).await;
        assert_eq!(json(&body)["data"]["released"], serde_json::json!([5]));

        let req = Request::builder().method("POST").uri("/prune").body(Body::empty()).unwrap();
        let (status, _, body) = call(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["data"]["pruned"], 0);
    }

    #[tokio::test]
    async fn test_document_conditional_put() {
        let state = make_state(None);

        let (status, _, _) = call(&state, get("/document")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let doc = r#"{"schema":1,"locks":{"7":{"owner_id":"u9","expires_at":9999999}}}"#;
        let put = |tag_header: Option<(&str, &str)>, body: &str| {
            let mut req = Request::builder().method("PUT").uri("/document");
            if let Some((name, value)) = tag_header {
                req = req.header(name, value);
            }
            req.body(Body::from(body.to_string())).unwrap()
        };

        let (status, _, _) = call(&state, put(None, doc)).await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);

        let (status, headers, _) = call(&state, put(Some(("if-none-match", "*")), doc)).await;
        assert_eq!(status, StatusCode::OK);
        let etag = headers[header::ETAG].to_str().unwrap().to_string();

        // Same precondition again: the document now exists
        let (status, _, _) = call(&state, put(Some(("if-none-match", "*")), doc)).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);

        let (status, headers, body) = call(&state, get("/document")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ETAG].to_str().unwrap(), etag);
        assert_eq!(json(&body)["locks"]["7"]["owner_id"], "u9");

        let (status, _, _) = call(&state, put(Some(("if-match", &etag)), r#"{"schema":1,"bogus":1}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = call(&state, put(Some(("if-match", &etag)), r#"{"schema":1}"#)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = call(&state, put(Some(("if-match", &etag)), r#"{"schema":1}"#)).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_unknown_storage_falls_back_to_memory() {
        let client = create_client("bogus:thing", None, GridConfig::default());
        assert_eq!(client.describe_store(), "in-memory");

        let client = create_client("memory", None, GridConfig::default());
        assert_eq!(client.describe_store(), "in-memory");
    }
}
