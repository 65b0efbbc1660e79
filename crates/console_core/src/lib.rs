//! Resource orchestration for the console: list fetching with query tracking,
//! selection and polling, plus batch workflows with explicit state transitions.

pub mod context;
pub mod error;
pub mod fetch;
pub mod list;
mod poll;
pub mod source;
pub mod workflow;

pub use context::ConsoleContext;
pub use error::{WorkflowAction, WorkflowError};
pub use fetch::{FetchLifecycle, FetchState, FetchTicket, FetchTracker};
pub use list::{not_found_as_empty, FetchOutcome, ListConfig, ListOrchestrator, ListSnapshot};
pub use source::{executor_fn, source_fn, BatchExecutor, FnExecutor, FnSource, RecordSource};
pub use workflow::{
    is_success_workflow, HookContext, HookTrigger, OperationResult, OperationState,
    WorkflowEvent, WorkflowOrchestrator, WorkflowState,
};
