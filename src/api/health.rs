//! Liveness check.

/// Always `200 OK` with body `OK` while the server accepts requests.
pub(crate) async fn health() -> &'static str {
    "OK"
}
