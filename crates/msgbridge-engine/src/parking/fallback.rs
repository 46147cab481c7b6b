//! Portable parking on `Mutex` + `Condvar`

use super::{ParkTicket, WorkerParking};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Condvar-backed parking
pub struct FallbackParking {
    epoch: Mutex<u32>,
    cond: Condvar,
}

impl FallbackParking {
    /// New parking instance
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    fn bump(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn prepare(&self) -> ParkTicket {
        ParkTicket(*self.epoch.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn park(&self, ticket: ParkTicket, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        while *epoch == ticket.0 {
            match deadline {
                None => {
                    epoch = self.cond.wait(epoch).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    epoch = self
                        .cond
                        .wait_timeout(epoch, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }

    fn wake_one(&self) {
        self.bump();
        self.cond.notify_one();
    }

    fn wake_all(&self) {
        self.bump();
        self.cond.notify_all();
    }
}
