//! In-process serialization of mutations per student.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::StudentId;

type LockMap = HashMap<StudentId, Arc<AsyncMutex<()>>>;

/// One async mutex per student, created on first use and dropped when the
/// last holder or waiter lets go. Clones share the same locks.
#[derive(Debug, Clone, Default)]
pub struct StudentLocks {
    locks: Arc<Mutex<LockMap>>,
}

fn lock_map(map: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StudentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other mutation for `student` is running. The lock is
    /// held until the guard is dropped.
    pub async fn acquire(&self, student: StudentId) -> StudentGuard {
        let lock = Arc::clone(lock_map(&self.locks).entry(student).or_default());
        StudentGuard {
            locks: Arc::clone(&self.locks),
            student,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of students with a live lock entry.
    pub fn tracked(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

/// Exclusive hold on one student's lock.
#[derive(Debug)]
pub struct StudentGuard {
    locks: Arc<Mutex<LockMap>>,
    student: StudentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StudentGuard {
    fn drop(&mut self) {
        // Clones of the entry are only taken under the map lock, so the
        // count is stable while we hold it.
        let mut map = lock_map(&self.locks);
        drop(self.guard.take());
        if map
            .get(&self.student)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.student);
        }
    }
}
