use std::fmt;

use thiserror::Error;

use crate::workflow::OperationState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    Start,
    Perform,
    Cancel,
    Reset,
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Perform => "perform",
            Self::Cancel => "cancel",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("cannot {action} a workflow in state {from:?}")]
    InvalidStateTransition {
        from: OperationState,
        action: WorkflowAction,
    },
    #[error("workflow requires at least one target")]
    NoTargets,
}
