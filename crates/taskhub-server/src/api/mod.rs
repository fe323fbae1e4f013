mod rest;
mod ws;

pub use rest::{create_router, ApiError, AppState};
