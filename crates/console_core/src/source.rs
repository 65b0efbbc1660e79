use std::future::Future;

use async_trait::async_trait;
use shared::{error::ApiException, query::QueryState, record::RecordSet};

use crate::workflow::OperationResult;

#[async_trait]
pub trait RecordSource<F, T>: Send + Sync {
    async fn fetch(&self, query: QueryState<F>) -> Result<RecordSet<T>, ApiException>;
}

/// Runs a batch operation. Results come back one per target, in target order.
/// An `Err` means the call failed as a whole and is recorded against every target.
#[async_trait]
pub trait BatchExecutor<Target, Params>: Send + Sync {
    async fn execute(
        &self,
        targets: Vec<Target>,
        params: Params,
    ) -> Result<Vec<OperationResult<Target>>, ApiException>;
}

pub struct FnSource<Func>(Func);

pub fn source_fn<Func>(func: Func) -> FnSource<Func> {
    FnSource(func)
}

#[async_trait]
impl<F, T, Func, Fut> RecordSource<F, T> for FnSource<Func>
where
    F: Send + 'static,
    T: Send + 'static,
    Func: Fn(QueryState<F>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RecordSet<T>, ApiException>> + Send + 'static,
{
    async fn fetch(&self, query: QueryState<F>) -> Result<RecordSet<T>, ApiException> {
        (self.0)(query).await
    }
}

pub struct FnExecutor<Func>(Func);

pub fn executor_fn<Func>(func: Func) -> FnExecutor<Func> {
    FnExecutor(func)
}

#[async_trait]
impl<Target, Params, Func, Fut> BatchExecutor<Target, Params> for FnExecutor<Func>
where
    Target: Send + 'static,
    Params: Send + 'static,
    Func: Fn(Vec<Target>, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<OperationResult<Target>>, ApiException>> + Send + 'static,
{
    async fn execute(
        &self,
        targets: Vec<Target>,
        params: Params,
    ) -> Result<Vec<OperationResult<Target>>, ApiException> {
        (self.0)(targets, params).await
    }
}
