pub mod error;
pub mod response;
pub mod signing;

pub use error::{AppError, AppResult};
