// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Failure state of a queue.

use prism_core::renderer::RenderError;
use std::sync::atomic::{AtomicBool, Ordering};

/// Remembers that a queue failed a submission. A failed queue rejects all later work.
#[derive(Debug, Default)]
pub(crate) struct QueueHealth {
    poisoned: AtomicBool,
}

impl QueueHealth {
    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    /// `QueueLost` once poisoned, `DeviceLost` when the device is gone.
    pub(crate) fn check(&self, device_lost: bool) -> Result<(), RenderError> {
        if self.is_poisoned() {
            return Err(RenderError::QueueLost);
        }
        if device_lost {
            return Err(RenderError::DeviceLost);
        }
        Ok(())
    }

    /// Passes `result` through, poisoning the queue when it is an error.
    pub(crate) fn guard<T>(
        &self,
        label: &str,
        result: Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        if let Err(err) = &result {
            self.poison();
            log::error!("Queue ({label}): submission failed, the queue is lost: {err}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_submission_loses_the_queue() {
        let health = QueueHealth::default();
        assert!(health.check(false).is_ok());

        let failed: Result<(), _> = health.guard(
            "test",
            Err(RenderError::SubmissionFailed("encoder rejected".to_string())),
        );

        assert!(matches!(failed, Err(RenderError::SubmissionFailed(_))));
        assert!(health.is_poisoned());
        assert!(matches!(health.check(false), Err(RenderError::QueueLost)));
        assert!(matches!(health.check(true), Err(RenderError::QueueLost)));
    }

    #[test]
    fn test_successful_steps_keep_the_queue() {
        let health = QueueHealth::default();

        let value = health.guard("test", Ok(7)).unwrap();

        assert_eq!(value, 7);
        assert!(!health.is_poisoned());
        assert!(matches!(health.check(true), Err(RenderError::DeviceLost)));
    }
}
