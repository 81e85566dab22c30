pub mod health;
pub mod queue;

use crate::AppState;
use axum::Router;

pub fn create_router() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(queue::routes())
}
