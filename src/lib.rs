pub mod client;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod hub;
pub mod models;
pub mod routes;
pub mod session;
pub mod store;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use error::{AppError, AppResult};
pub use hub::Hub;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub hub: Hub,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        let hub = Hub::new(db_pool.clone());
        Self { db_pool, hub }
    }
}
