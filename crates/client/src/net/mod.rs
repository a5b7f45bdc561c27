pub mod client;
pub mod config;
pub mod query;

pub use client::{ClientEvent, TableClient};
pub use config::ClientConfig;
pub use query::{QueryClient, QueryError};
