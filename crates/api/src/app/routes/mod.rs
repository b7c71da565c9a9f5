use axum::{
    Router,
    routing::{get, post},
};

pub mod bills;
pub mod system;

/// Router for the bill endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/bills", post(bills::create_bill).get(bills::list_bills))
        .route("/bills/:id", get(bills::get_bill))
        .route("/bills/:id/items", post(bills::add_line_item))
        .route("/bills/:id/close", post(bills::close_bill))
}
