use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod fee_settings;
pub mod health;
pub mod identity;
pub mod members;
pub mod monthly_fees;
pub mod reports;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/me", get(identity::me))
        .merge(fee_settings::router())
        .merge(monthly_fees::router())
        .merge(members::router())
        .merge(reports::router())
}
