use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

fn healthy() -> Health {
    Health {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    }
}

pub async fn root() -> Json<Health> {
    Json(healthy())
}

pub async fn health() -> Json<Health> {
    Json(healthy())
}
