// This file is part of the sixman library.
// Copyright (C) 2026 The sixman authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A cell that is initialized at most once, using double-checked locking.
///
/// A reader that observes the initialized flag (acquire ordering) sees the
/// fully written value and never takes the mutex. Initialization failures
/// leave the cell empty.
#[derive(Debug)]
pub(crate) struct Lazy<T> {
    initialized: AtomicBool,
    lock: Mutex<()>,
    value: UnsafeCell<Option<T>>,
}

unsafe impl<T: Send> Send for Lazy<T> {}
unsafe impl<T: Send + Sync> Sync for Lazy<T> {}

impl<T> Lazy<T> {
    pub fn new() -> Lazy<T> {
        Lazy {
            initialized: AtomicBool::new(false),
            lock: Mutex::new(()),
            value: UnsafeCell::new(None),
        }
    }

    pub fn get_or_try_init<F, E>(&self, f: F) -> Result<&T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.initialized.load(Ordering::Acquire) {
            let _guard = self.lock.lock().unwrap();

            // The flag may have been set between the first check and
            // acquiring the lock. The mutex synchronizes with the writer, so
            // a relaxed load suffices here.
            if !self.initialized.load(Ordering::Relaxed) {
                // Safety: the lock is held and the flag is still clear, so
                // no other thread is accessing the slot.
                let value = unsafe { &mut *self.value.get() };
                *value = Some(f()?);
                self.initialized.store(true, Ordering::Release);
            }
        }

        // Safety: the flag is set, so the slot holds a value that will never
        // be written again.
        Ok(unsafe { &*self.value.get() }.as_ref().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_once() {
        let cell: Lazy<u32> = Lazy::new();
        let mut calls = 0;

        for _ in 0..3 {
            let value = cell.get_or_try_init(|| {
                calls += 1;
                Ok::<_, ()>(42)
            });
            assert_eq!(value, Ok(&42));
        }

        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_init_leaves_cell_empty() {
        let cell: Lazy<u32> = Lazy::new();
        assert_eq!(cell.get_or_try_init(|| Err::<u32, &str>("nope")), Err("nope"));
        assert_eq!(cell.get_or_try_init(|| Ok::<_, &str>(7)), Ok(&7));
    }
}
