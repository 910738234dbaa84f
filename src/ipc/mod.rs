mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::{err, BAD_JSON};
pub use router::handle_request;
pub use types::{AppState, Request};
