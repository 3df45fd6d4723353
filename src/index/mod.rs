pub mod cache;

pub use cache::{Admission, CacheEntry, CacheStream, SearchCache, DEFAULT_PAGE_SIZE};
