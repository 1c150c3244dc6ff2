//! Units of work and the backends they run against

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use fleetexec_exec::{Backend, ExecError, Host};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The caller-supplied job run once per host
#[async_trait]
pub trait Work: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Run against one host's backend
    async fn run(&self, backend: &dyn Backend) -> Result<Self::Output, ExecError>;
}

/// [`Work`] built from a closure
pub struct FnWork<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Wrap a closure returning a boxed future as [`Work`]
///
/// ```ignore
/// let work = work_fn(|backend| Box::pin(async move {
///     backend.capture("uptime", &[], CommandOptions::default()).await
/// }));
/// ```
pub fn work_fn<F, T>(f: F) -> FnWork<F, T>
where
    F: for<'a> Fn(&'a dyn Backend) -> BoxFuture<'a, Result<T, ExecError>> + Send + Sync + 'static,
    T: Send + 'static,
{
    FnWork {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<F, T> Work for FnWork<F, T>
where
    F: for<'a> Fn(&'a dyn Backend) -> BoxFuture<'a, Result<T, ExecError>> + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn run(&self, backend: &dyn Backend) -> Result<T, ExecError> {
        (self.f)(backend).await
    }
}

/// Builds the backend a unit of work runs against
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Create a backend for one host
    async fn create(&self, host: Arc<Host>) -> Result<Box<dyn Backend>, ExecError>;
}
