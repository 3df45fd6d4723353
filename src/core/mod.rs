pub mod preference;
pub mod retry;
pub mod tag;

pub use preference::*;
pub use retry::*;
pub use tag::*;
