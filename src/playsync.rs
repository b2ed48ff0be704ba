// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::{Condvar, Mutex};

/// A cancel handle is shared with a long-running operation such as a bank
/// load or an audio run loop. It's the operation's responsibility to observe
/// a cancel request and exit.
///
/// `is_cancelled` is an atomic load so it can be polled from tight loops
/// (between file decodes, inside the audio run loop) without taking a lock.
#[derive(Clone)]
pub struct CancelHandle {
    /// Set to true once the underlying operation should be cancelled.
    cancelled: Arc<AtomicBool>,
    /// Guards the condvar for waiters.
    lock: Arc<Mutex<()>>,
    /// Notified on cancellation or when the watched operation finishes.
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            lock: Arc::new(Mutex::new(())),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until the handle is cancelled or until finished is set to true.
    pub fn wait(&self, finished: Arc<AtomicBool>) {
        let mut guard = self.lock.lock();
        while !self.cancelled.load(Ordering::SeqCst) && !finished.load(Ordering::SeqCst) {
            self.condvar.wait(&mut guard);
        }
    }

    /// Wakes up waiters so they can re-check whether the watched operation
    /// has finished.
    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }

    /// Cancels the operation. Idempotent.
    pub fn cancel(&self) {
        let _guard = self.lock.lock();
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.condvar.notify_all();
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}
