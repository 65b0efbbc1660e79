//! Batch operations (create/update/delete against N targets) driven through
//! `Pending -> Started -> Performing -> Done`.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{future::BoxFuture, FutureExt};
use shared::error::{ApiException, ErrorCode};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    context::ConsoleContext,
    error::{WorkflowAction, WorkflowError},
    source::BatchExecutor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Pending,
    Started,
    Performing,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<Target> {
    pub target: Target,
    pub success: bool,
    pub error: Option<ApiException>,
}

impl<Target> OperationResult<Target> {
    pub fn succeeded(target: Target) -> Self {
        Self {
            target,
            success: true,
            error: None,
        }
    }

    pub fn failed(target: Target, error: ApiException) -> Self {
        Self {
            target,
            success: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState<Target, Params> {
    pub operation_state: OperationState,
    pub targets: Vec<Target>,
    pub params: Option<Params>,
    pub results: Vec<OperationResult<Target>>,
}

impl<Target, Params> WorkflowState<Target, Params> {
    pub fn new() -> Self {
        Self {
            operation_state: OperationState::Pending,
            targets: Vec::new(),
            params: None,
            results: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| result.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult<Target>> {
        self.results.iter().filter(|result| !result.success)
    }

    fn clear(&mut self) {
        self.operation_state = OperationState::Pending;
        self.targets.clear();
        self.params = None;
        self.results.clear();
    }
}

impl<Target, Params> Default for WorkflowState<Target, Params> {
    fn default() -> Self {
        Self::new()
    }
}

/// True when every target of the workflow succeeded.
pub fn is_success_workflow<Target, Params>(state: &WorkflowState<Target, Params>) -> bool {
    state.is_success()
}

/// Outcome a completion hook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookTrigger {
    /// Every `Done` transition.
    Done,
    /// `Done` with all targets successful.
    Succeeded,
    /// `Done` with at least one failed target.
    Failed,
}

pub struct HookContext<Target, Params> {
    pub state: WorkflowState<Target, Params>,
    pub context: ConsoleContext,
}

type WorkflowHook<Target, Params> =
    Arc<dyn Fn(HookContext<Target, Params>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowEvent {
    pub from: OperationState,
    pub to: OperationState,
}

pub struct WorkflowOrchestrator<Target, Params> {
    name: String,
    context: ConsoleContext,
    executor: Arc<dyn BatchExecutor<Target, Params>>,
    state: Mutex<WorkflowState<Target, Params>>,
    hooks: Mutex<HashMap<HookTrigger, Vec<WorkflowHook<Target, Params>>>>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl<Target, Params> WorkflowOrchestrator<Target, Params>
where
    Target: Clone + Send + Sync + 'static,
    Params: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        context: ConsoleContext,
        executor: Arc<dyn BatchExecutor<Target, Params>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            name: name.into(),
            context,
            executor,
            state: Mutex::new(WorkflowState::new()),
            hooks: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn state(&self) -> WorkflowState<Target, Params> {
        self.lock_state().clone()
    }

    pub fn operation_state(&self) -> OperationState {
        self.lock_state().operation_state
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Registers `hook` to run after each `Done` transition matching `trigger`.
    /// Hooks run in registration order, `Done` hooks before outcome hooks.
    pub fn on<H, Fut>(&self, trigger: HookTrigger, hook: H)
    where
        H: Fn(HookContext<Target, Params>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: WorkflowHook<Target, Params> = Arc::new(move |ctx| hook(ctx).boxed());
        self.lock_hooks().entry(trigger).or_default().push(hook);
    }

    pub fn start(&self, targets: Vec<Target>, params: Params) -> Result<(), WorkflowError> {
        {
            let mut state = self.lock_state();
            ensure_state(&state, OperationState::Pending, WorkflowAction::Start)?;
            if targets.is_empty() {
                return Err(WorkflowError::NoTargets);
            }
            state.targets = targets;
            state.params = Some(params);
            state.results.clear();
            state.operation_state = OperationState::Started;
        }
        self.emit(OperationState::Pending, OperationState::Started);
        Ok(())
    }

    /// Runs the executor over the started targets. Reaches `Done` whatever the
    /// per-target outcome; inspect the returned state's results.
    pub async fn perform(&self) -> Result<WorkflowState<Target, Params>, WorkflowError> {
        let (targets, params) = {
            let mut state = self.lock_state();
            ensure_state(&state, OperationState::Started, WorkflowAction::Perform)?;
            let Some(params) = state.params.clone() else {
                return Err(WorkflowError::InvalidStateTransition {
                    from: state.operation_state,
                    action: WorkflowAction::Perform,
                });
            };
            state.operation_state = OperationState::Performing;
            (state.targets.clone(), params)
        };
        self.emit(OperationState::Started, OperationState::Performing);
        debug!(workflow = %self.name, targets = targets.len(), "performing");

        let mut guard = Performing {
            workflow: self,
            completed: false,
        };
        let results = match self.executor.execute(targets.clone(), params).await {
            Ok(results) => results,
            Err(error) => {
                warn!(workflow = %self.name, %error, "executor failed for the whole batch");
                targets
                    .into_iter()
                    .map(|target| OperationResult::failed(target, error.clone()))
                    .collect()
            }
        };
        guard.completed = true;

        let snapshot = {
            let mut state = self.lock_state();
            state.results = results;
            state.operation_state = OperationState::Done;
            state.clone()
        };
        self.emit(OperationState::Performing, OperationState::Done);

        let failed = snapshot.failures().count();
        info!(
            workflow = %self.name,
            succeeded = snapshot.results.len() - failed,
            failed,
            "workflow done"
        );
        for failure in snapshot.failures() {
            if let Some(error) = &failure.error {
                self.context.report_error(error);
            }
        }

        self.run_hooks(&snapshot).await;
        Ok(snapshot)
    }

    /// Abandons a started workflow without touching the executor.
    pub fn cancel(&self) -> Result<(), WorkflowError> {
        {
            let mut state = self.lock_state();
            ensure_state(&state, OperationState::Started, WorkflowAction::Cancel)?;
            state.clear();
        }
        self.emit(OperationState::Started, OperationState::Pending);
        Ok(())
    }

    /// Clears targets and results so the workflow can be reused. A pending
    /// workflow is left as is; a performing one is rejected.
    pub fn reset(&self) -> Result<(), WorkflowError> {
        let from = {
            let mut state = self.lock_state();
            let from = state.operation_state;
            match from {
                OperationState::Pending => return Ok(()),
                OperationState::Performing => {
                    return Err(WorkflowError::InvalidStateTransition {
                        from,
                        action: WorkflowAction::Reset,
                    })
                }
                OperationState::Started | OperationState::Done => state.clear(),
            }
            from
        };
        self.emit(from, OperationState::Pending);
        Ok(())
    }

    async fn run_hooks(&self, snapshot: &WorkflowState<Target, Params>) {
        fire_hooks(self.hooks_for(snapshot), snapshot.clone(), self.context.clone()).await;
    }

    /// `Done` hooks followed by the hooks for the snapshot's outcome.
    fn hooks_for(&self, snapshot: &WorkflowState<Target, Params>) -> Vec<WorkflowHook<Target, Params>> {
        let outcome = if snapshot.is_success() {
            HookTrigger::Succeeded
        } else {
            HookTrigger::Failed
        };
        let hooks = self.lock_hooks();
        [HookTrigger::Done, outcome]
            .iter()
            .filter_map(|trigger| hooks.get(trigger))
            .flatten()
            .cloned()
            .collect()
    }

    fn emit(&self, from: OperationState, to: OperationState) {
        debug!(workflow = %self.name, ?from, ?to, "transition");
        let _ = self.events.send(WorkflowEvent { from, to });
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkflowState<Target, Params>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_hooks(&self) -> MutexGuard<'_, HashMap<HookTrigger, Vec<WorkflowHook<Target, Params>>>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn fire_hooks<Target, Params>(
    hooks: Vec<WorkflowHook<Target, Params>>,
    state: WorkflowState<Target, Params>,
    context: ConsoleContext,
) where
    Target: Clone,
    Params: Clone,
{
    for hook in hooks {
        hook(HookContext {
            state: state.clone(),
            context: context.clone(),
        })
        .await;
    }
}

fn ensure_state<Target, Params>(
    state: &WorkflowState<Target, Params>,
    expected: OperationState,
    action: WorkflowAction,
) -> Result<(), WorkflowError> {
    if state.operation_state == expected {
        Ok(())
    } else {
        Err(WorkflowError::InvalidStateTransition {
            from: state.operation_state,
            action,
        })
    }
}

/// Finishes the workflow with failed results if `perform` is dropped while
/// the executor is still running. Completion hooks then run on a spawned task.
struct Performing<'a, Target, Params>
where
    Target: Clone + Send + Sync + 'static,
    Params: Clone + Send + Sync + 'static,
{
    workflow: &'a WorkflowOrchestrator<Target, Params>,
    completed: bool,
}

impl<Target, Params> Drop for Performing<'_, Target, Params>
where
    Target: Clone + Send + Sync + 'static,
    Params: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let snapshot = {
            let mut state = self.workflow.lock_state();
            if state.operation_state != OperationState::Performing {
                return;
            }
            let error = ApiException::new(ErrorCode::Internal, "operation interrupted before completion");
            state.results = state
                .targets
                .iter()
                .cloned()
                .map(|target| OperationResult::failed(target, error.clone()))
                .collect();
            state.operation_state = OperationState::Done;
            state.clone()
        };
        warn!(workflow = %self.workflow.name, "perform dropped while executing");
        self.workflow
            .emit(OperationState::Performing, OperationState::Done);

        let hooks = self.workflow.hooks_for(&snapshot);
        if hooks.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(fire_hooks(hooks, snapshot, self.workflow.context.clone()));
            }
            Err(_) => {
                warn!(workflow = %self.workflow.name, "no runtime to run completion hooks on");
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
