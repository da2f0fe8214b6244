pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod worker;

pub use error::{QueueError, Result};
pub use server::QueueServer;
