use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "moodcheck-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.schedules.remote().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "database": "ok" },
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "checks": { "database": "failed" },
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{june_first_at, TestApp};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_is_public() {
        let app = TestApp::new(june_first_at(9, 0));
        let (status, body) = app.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "moodcheck-api");
    }

    #[tokio::test]
    async fn test_readyz_tracks_remote_store() {
        let app = TestApp::new(june_first_at(9, 0));
        let (status, _) = app.send("GET", "/readyz", None, None).await;
        assert_eq!(status, StatusCode::OK);

        app.remote.set_offline(true);
        let (status, body) = app.send("GET", "/readyz", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["database"], "failed");
    }
}
