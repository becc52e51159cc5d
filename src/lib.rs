pub mod config;
pub mod error;
pub mod ffi;
pub mod merge;
pub mod remote;
pub mod repository;
pub mod store;
pub mod sync;
pub mod task;

pub use config::{ConfigError, SyncConfig};
pub use error::{StoreError, SyncError, SyncResult};
pub use merge::{PullSummary, RemoteCollection};
pub use remote::{HttpRemoteClient, MemoryRemote, RemoteClient, RemoteResponse};
pub use repository::{MemoryTaskRepository, StagedChange, TaskRepository, UnitOfWork};
pub use store::SqliteTaskStore;
pub use sync::SyncEngine;
pub use task::{InvalidRecord, Priority, Task, TaskRepresentation};
