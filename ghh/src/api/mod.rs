//! Control API of the mother-ship.
//!
//! Every route requires `Authorization: Bearer <token>`. Long-running wing
//! operations answer with a chunked progress body (see [`progress`]).

pub mod error;
pub mod middleware;
pub mod progress;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use middleware::TokenValidator;
pub use progress::ProgressLine;
pub use routes::AppState;
pub use server::{build_router, serve};
