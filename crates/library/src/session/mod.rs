//! Import sessions: placing a batch of files into the library and undoing it.
//!
//! A [`FileManager`] owns the "one active session" slot and knows how to hash
//! and place a single file. An [`ImportSession`] records everything a batch
//! created so [`FileManager::rollback_session`] can remove exactly that.

mod manager;
mod models;
mod roots;

pub use self::manager::{FileManager, FileProgress, FileStage};
pub use self::models::{
    FileOutcome, ImportResult, ImportSession, ImportTask, RollbackReport, SessionContext, SessionId, SessionStatus,
    TaskStatus,
};
pub use self::roots::RootRegistry;
