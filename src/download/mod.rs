pub mod client;
pub mod http;
pub mod naming;
pub mod queue;
pub mod worker;

pub use client::DownloadClient;
pub use http::HttpDownloadClient;
pub use naming::file_name_for_url;
pub use queue::DownloadQueue;
pub use worker::{DownloadBackoff, DownloadWorker};
