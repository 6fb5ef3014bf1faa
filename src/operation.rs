//! Cancellable operation environments
//!
//! Every blocking device call takes a `&dyn OperationEnvironment`. It is
//! the single channel through which a long operation can be aborted and
//! through which it reports progress.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{DeviceError, DeviceResult};

pub trait OperationEnvironment: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// Sleep for the given duration, waking early with
    /// [`DeviceError::Cancelled`] when the operation gets cancelled
    fn sleep(&self, duration: Duration) -> DeviceResult<()>;

    fn set_text(&self, _text: &str) {}

    fn set_progress_range(&self, _range: u64) {}

    fn set_progress_position(&self, _position: u64) {}

    fn set_error_message(&self, _text: &str) {}

    fn check_cancelled(&self) -> DeviceResult<()> {
        if self.is_cancelled() {
            Err(DeviceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// An environment that is never cancelled and reports nowhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOperationEnvironment;

impl OperationEnvironment for NullOperationEnvironment {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn sleep(&self, duration: Duration) -> DeviceResult<()> {
        std::thread::sleep(duration);
        Ok(())
    }
}

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cond) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until the timeout expires or the flag is raised. Returns
    /// `true` when cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cond) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = cond
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *cancelled
    }
}

/// Environment backed by a [`CancelFlag`], used by background jobs
#[derive(Debug, Default, Clone)]
pub struct CancellableEnvironment {
    flag: CancelFlag,
}

impl CancellableEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(flag: CancelFlag) -> Self {
        CancellableEnvironment { flag }
    }

    pub fn cancel(&self) {
        self.flag.cancel();
    }

    pub fn flag(&self) -> CancelFlag {
        self.flag.clone()
    }
}

impl OperationEnvironment for CancellableEnvironment {
    fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    fn sleep(&self, duration: Duration) -> DeviceResult<()> {
        if self.flag.wait_timeout(duration) {
            Err(DeviceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Draws progress of an operation as a terminal progress bar and forwards
/// cancellation to a wrapped environment
pub struct ProgressEnvironment<'a> {
    inner: &'a dyn OperationEnvironment,
    bar: ProgressBar,
}

impl<'a> ProgressEnvironment<'a> {
    pub fn new(inner: &'a dyn OperationEnvironment, msg: &str) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "[{spinner:.green} {elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(msg.to_owned());

        ProgressEnvironment { inner, bar }
    }

    pub fn finish(&self) {
        self.bar.finish();
    }
}

impl OperationEnvironment for ProgressEnvironment<'_> {
    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    fn sleep(&self, duration: Duration) -> DeviceResult<()> {
        self.inner.sleep(duration)
    }

    fn set_text(&self, text: &str) {
        self.bar.set_message(text.to_owned());
    }

    fn set_progress_range(&self, range: u64) {
        self.bar.set_length(range);
    }

    fn set_progress_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    fn set_error_message(&self, text: &str) {
        self.bar.abandon_with_message(text.to_owned());
    }
}
