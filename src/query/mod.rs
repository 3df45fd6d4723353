pub mod client;
pub mod credentials;
pub mod http;
pub mod server;

pub use client::SearchClient;
pub use credentials::Credentials;
pub use http::HttpSearchClient;
pub use server::StatusServer;
