use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::auth::handlers::{
    delete_account, forgot_password, login, logout, me, register, reset_password,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/account", delete(delete_account))
}

pub fn me_router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}
