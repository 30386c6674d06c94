use axum::Router;

pub mod provisioning;
pub mod system;

/// Router for every operator endpoint.
pub fn router() -> Router {
    Router::new().nest("/provisioning", provisioning::router())
}
