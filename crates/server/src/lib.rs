//! Parley HTTP server
//!
//! Exposes the retrieval core over REST: document upload and management,
//! scoped search, the per-turn context endpoint, persona CRUD, and
//! contextualization statistics.

pub mod error;
pub mod http;
pub mod metrics;
pub mod state;

pub use error::ApiError;
pub use http::create_router;
pub use state::{AppState, Services};
