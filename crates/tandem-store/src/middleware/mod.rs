//! Pipeline stages, in the order the worker installs them:
//! router, request lifecycle, undo/redo.

pub mod lifecycle;
pub mod router;
pub mod undo;

pub use lifecycle::{RequestLifecycle, request};
pub use router::{ActionRouter, route};
pub use undo::{UndoEntry, UndoHistory, UndoMiddleware, UndoRegistry, UndoScope};
