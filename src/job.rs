//! Background jobs with cooperative cancellation

use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::error::{DeviceError, DeviceResult};
use crate::operation::{CancellableEnvironment, OperationEnvironment};

/// A closure running on its own thread with a [`CancellableEnvironment`].
///
/// Dropping the job cancels it and waits for the thread, which returns
/// within one port poll interval of the cancellation.
pub struct AsyncJob<T: Send + 'static> {
    name: String,
    env: CancellableEnvironment,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> AsyncJob<T> {
    pub fn start(
        name: &str,
        f: impl FnOnce(&dyn OperationEnvironment) -> T + Send + 'static,
    ) -> DeviceResult<Self> {
        let env = CancellableEnvironment::new();
        let job_env = env.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(&job_env))
            .map_err(|e| DeviceError::Communication(format!("cannot start {}: {}", name, e)))?;

        debug!("Started job {}", name);
        Ok(AsyncJob {
            name: name.to_string(),
            env,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn cancel(&self) {
        self.env.cancel();
    }

    /// Waits for the job; `None` if it panicked or was already joined
    pub fn join(&mut self) -> Option<T> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(result) => Some(result),
            Err(_) => {
                error!("Job {} panicked", self.name);
                None
            }
        }
    }
}

impl<T: Send + 'static> Drop for AsyncJob<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            self.join();
        }
    }
}
