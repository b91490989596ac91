//! Shared-Secret Bearer Gate
//!
//! Gates the API routes behind a single static secret. With no secret
//! configured the gate is a transparent no-op. A missing or malformed
//! `Authorization` header yields 401, a mismatched token 403. The comparison
//! is constant-time so response timing does not leak the secret.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

pub async fn bearer_gate(
    State(secret): State<Option<String>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(secret) = secret else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        None => reject(StatusCode::UNAUTHORIZED, "missing bearer token"),
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => {
            next.run(req).await
        }
        Some(_) => reject(StatusCode::FORBIDDEN, "invalid bearer token"),
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    let body = Json(serde_json::json!({
        "success": false,
        "error": message,
    }));
    (status, body).into_response()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    fn test_app(secret: Option<&str>) -> Router {
        Router::new()
            .route("/api/stacks", get(ok_handler))
            .layer(middleware::from_fn_with_state(
                secret.map(str::to_string),
                bearer_gate,
            ))
    }

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/stacks");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn no_secret_passes_everything_through() {
        let resp = test_app(None).oneshot(request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let resp = test_app(Some("s3cret")).oneshot(request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_header_is_unauthorized() {
        let resp = test_app(Some("s3cret"))
            .oneshot(request(Some("Basic dXNlcg==")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_is_forbidden() {
        let resp = test_app(Some("s3cret"))
            .oneshot(request(Some("Bearer nope")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn matching_token_passes() {
        let resp = test_app(Some("s3cret"))
            .oneshot(request(Some("Bearer s3cret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
