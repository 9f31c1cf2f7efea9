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

//! Wait results and timeout helpers shared by events, queues and swapchains.

use std::time::{Duration, Instant};

/// Timeout value meaning "wait forever".
pub const INFINITE_TIMEOUT: Duration = Duration::MAX;

/// Outcome of a blocking wait. A timeout is a status, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// The awaited value was reached.
    Signaled,
    /// The timeout elapsed first. The resource must still be treated as busy.
    Timeout,
}

impl WaitStatus {
    /// `true` for [`WaitStatus::Signaled`].
    pub fn is_signaled(&self) -> bool {
        matches!(self, WaitStatus::Signaled)
    }
}

/// Outcome of acquiring a swapchain back buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquireStatus {
    /// The back buffer with this index is free and now current.
    Acquired(u32),
    /// The previous frame on the next back buffer did not finish in time.
    Timeout,
}

/// Deadline of a wait of `timeout` starting now. `None` when unbounded.
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time left until `deadline`, saturating at zero. `None` means unbounded.
pub fn remaining_until(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infinite_timeout_has_no_deadline() {
        assert_eq!(deadline_after(INFINITE_TIMEOUT), None);
        assert_eq!(remaining_until(None), None);
    }

    #[test]
    fn test_elapsed_deadline_saturates() {
        let deadline = deadline_after(Duration::ZERO);
        assert_eq!(remaining_until(deadline), Some(Duration::ZERO));
    }
}
