pub mod checkpoint;
pub mod local_files;
pub mod session;
pub mod snapshot;
pub mod state;

pub use checkpoint::backup_snapshot;
pub use local_files::LocalFileIndex;
pub use session::SessionState;
pub use snapshot::SnapshotStore;
pub use state::{MemoryStateStore, PersistedState, StateStore};
