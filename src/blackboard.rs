use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::info::NmeaInfo;

/// The one shared sensor-data snapshot, guarded by a single mutex.
///
/// Never hold the lock across port I/O; parse into a scratch [`NmeaInfo`]
/// first and [`merge`](Blackboard::merge) the result.
#[derive(Debug)]
pub struct Blackboard {
    basic: Mutex<NmeaInfo>,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Blackboard {
    pub fn new() -> Self {
        Blackboard {
            basic: Mutex::new(NmeaInfo::new(Instant::now())),
        }
    }

    pub fn snapshot(&self) -> NmeaInfo {
        self.basic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn merge(&self, parsed: &NmeaInfo) {
        self.basic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(parsed);
    }

    /// Read-modify-write under the lock
    pub fn update<R>(&self, f: impl FnOnce(&mut NmeaInfo) -> R) -> R {
        let mut basic = self.basic.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut basic)
    }
}
