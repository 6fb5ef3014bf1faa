use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{DeviceError, DeviceResult};
use crate::operation::OperationEnvironment;

#[derive(Debug, Clone)]
struct Item<V> {
    value: V,
    /// Set when a new value has been requested and not yet received
    old: bool,
}

/// Settings a device reported, keyed by name.
///
/// The receive thread stores replies with [`set`](Self::set); a command
/// thread marks a key old, sends its request and [`wait`](Self::wait)s for
/// the fresh value.
#[derive(Debug)]
pub struct SettingsMap<V> {
    items: Mutex<HashMap<String, Item<V>>>,
    cond: Condvar,
}

impl<V> Default for SettingsMap<V> {
    fn default() -> Self {
        SettingsMap {
            items: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
        }
    }
}

impl<V: Clone> SettingsMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Item<V>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last known value, fresh or not
    pub fn get(&self, name: &str) -> Option<V> {
        self.lock().get(name).map(|item| item.value.clone())
    }

    pub fn set(&self, name: &str, value: V) {
        self.lock()
            .insert(name.to_string(), Item { value, old: false });
        self.cond.notify_all();
    }

    pub fn mark_old(&self, name: &str) {
        if let Some(item) = self.lock().get_mut(name) {
            item.old = true;
        }
    }

    /// Waits until a fresh value for `name` is present
    pub fn wait(
        &self,
        name: &str,
        env: &dyn OperationEnvironment,
        timeout: Duration,
    ) -> DeviceResult<V> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            if let Some(item) = items.get(name).filter(|item| !item.old) {
                return Ok(item.value.clone());
            }

            env.check_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::Timeout);
            }
            // wake up regularly to notice cancellation
            let slice = (deadline - now).min(crate::constants::PORT_POLL_INTERVAL);
            items = self
                .cond
                .wait_timeout(items, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CancellableEnvironment, NullOperationEnvironment};
    use std::sync::Arc;

    #[test]
    fn wait_returns_value_set_by_other_thread() {
        let map = Arc::new(SettingsMap::<String>::new());
        map.set("PILOT", "OLD".to_string());
        map.mark_old("PILOT");
        assert_eq!(map.get("PILOT").as_deref(), Some("OLD"));

        let writer = map.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.set("PILOT", "NEW".to_string());
        });

        let value = map
            .wait("PILOT", &NullOperationEnvironment, Duration::from_secs(5))
            .unwrap();
        assert_eq!(value, "NEW");
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_and_cancels() {
        let map = SettingsMap::<u32>::new();
        let result = map.wait("VOL", &NullOperationEnvironment, Duration::from_millis(30));
        assert!(matches!(result, Err(DeviceError::Timeout)));

        let env = CancellableEnvironment::new();
        env.cancel();
        let result = map.wait("VOL", &env, Duration::from_secs(5));
        assert!(matches!(result, Err(DeviceError::Cancelled)));
    }
}
