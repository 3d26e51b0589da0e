use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "telemedicine",
        "timestamp": Utc::now(),
    }))
}
