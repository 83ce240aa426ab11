//! Domain managers sitting between the HTTP handlers and the repository.

pub mod annotations;
pub mod designs;
pub mod requirements;
pub mod tasks;

pub use annotations::AnnotationVersionManager;
pub use designs::DesignRevisionManager;
pub use requirements::RequirementDocManager;
pub use tasks::{CodegenTaskManager, TaskContext};
