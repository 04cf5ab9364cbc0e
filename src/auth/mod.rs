use crate::state::AppState;
use axum::Router;

pub mod error;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod principal;
pub mod repo;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
