use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::StoreError;

/// A background fetch. Cancelling one that has not finished discards its
/// result before it reaches the collection.
#[derive(Debug)]
pub struct FetchHandle<T> {
    task: JoinHandle<Result<T, StoreError>>,
}

impl<T> FetchHandle<T>
where
    T: Send + 'static,
{
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        Self {
            task: tokio::spawn(future),
        }
    }

    pub fn cancel(&self) {
        debug!("cancelling background fetch");
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// `None` when the fetch was cancelled before it finished.
    pub async fn outcome(self) -> Option<Result<T, StoreError>> {
        match self.task.await {
            Ok(result) => Some(result),
            Err(err) if err.is_cancelled() => None,
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }
}
