mod child;
mod error;
pub mod lock;
pub mod release;
pub mod status;
pub mod wait_lock;

pub use error::Error;
