#[cfg(test)]
mod tests {
    use gridlease_core::GridError;

    use crate::remote::status_error;

    fn reply(code: u16, body: &str) -> ureq::Response {
        ureq::Response::new(code, "status", body).unwrap()
    }

    #[test]
    fn test_unavailable_reply_stays_retryable() {
        let err = status_error(
            503,
            reply(503, r#"{"success":false,"error":"gave up after 3 attempts","retryable":true}"#),
        );
        assert!(matches!(&err, GridError::StoreUnavailable(msg) if msg == "gave up after 3 attempts"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_map_to_typed_errors() {
        let err = status_error(400, reply(400, r#"{"success":false,"error":"cells must not be empty"}"#));
        assert!(matches!(&err, GridError::Validation(msg) if msg == "cells must not be empty"));
        assert!(!err.is_retryable());

        let err = status_error(404, reply(404, r#"{"success":false,"error":"no such region"}"#));
        assert!(matches!(err, GridError::UnknownRegion(_)));

        let err = status_error(500, reply(500, r#"{"success":false,"error":"bad document"}"#));
        assert!(matches!(err, GridError::MalformedDocument(_)));
    }

    #[test]
    fn test_unparseable_body_falls_back_to_status_code() {
        let err = status_error(401, reply(401, ""));
        assert!(matches!(&err, GridError::StoreUnavailable(msg) if msg == "unauthorized: HTTP 401"));
    }
}
