//! Route handlers for the upload API
//!
//! - [`upload`]: feed upload and pipeline run
//! - [`system`]: health and OpenAPI

mod system;
mod upload;

pub use system::*;
pub use upload::*;
