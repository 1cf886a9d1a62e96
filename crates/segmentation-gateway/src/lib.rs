pub mod api;
pub mod error;
pub mod router;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use server::SegmentationServer;
pub use state::{AppState, SharedState};
