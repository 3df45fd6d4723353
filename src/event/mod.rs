pub mod engine;
pub mod feedback;

pub use engine::{DiscoveryEngine, PassOutcome};
pub use feedback::{FeedbackSource, TerminalFeedback, Verdict};
