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

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle as RawWindow,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Combines the windowing handle traits required by graphics backends into one
/// object-safe trait.
pub trait WindowHandle: HasWindowHandle + HasDisplayHandle {}

impl<T: HasWindowHandle + HasDisplayHandle> WindowHandle for T {}

/// A shared, thread-safe window handle, as needed to create a surface that outlives
/// the borrow of the window.
pub type PrismWindowHandle = Arc<dyn WindowHandle + Send + Sync>;

/// The behavior a swapchain needs from a window.
///
/// Any windowing library can implement this trait. The window event loop itself is
/// outside this crate.
pub trait PrismWindow: HasWindowHandle + HasDisplayHandle + Send + Sync {
    /// Returns the physical dimensions (width, height) of the window's inner area.
    fn inner_size(&self) -> (u32, u32);

    /// Returns the scale factor of the window.
    fn scale_factor(&self) -> f64;

    /// Clones an Arc'd, thread-safe handle to the window, for surface creation.
    fn clone_handle_arc(&self) -> PrismWindowHandle;

    /// Returns the unique identifier for the window.
    fn id(&self) -> u64;
}

static NEXT_HEADLESS_ID: AtomicU64 = AtomicU64::new(1);

/// An off-screen "window": a size with no native surface behind it.
///
/// The emulated driver presents into it; hardware drivers reject it because it
/// exposes no raw handle.
#[derive(Debug)]
pub struct HeadlessWindow {
    id: u64,
    width: AtomicU32,
    height: AtomicU32,
}

impl HeadlessWindow {
    /// Creates a headless window of the given physical size.
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_HEADLESS_ID.fetch_add(1, Ordering::Relaxed),
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
        })
    }

    /// Changes the reported size, as a window resize event would.
    pub fn set_inner_size(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Release);
        self.height.store(height, Ordering::Release);
    }
}

impl HasWindowHandle for HeadlessWindow {
    fn window_handle(&self) -> Result<RawWindow<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

impl HasDisplayHandle for HeadlessWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

/// Keeps the window alive behind a [`PrismWindowHandle`].
#[derive(Debug)]
struct HeadlessHandle(Arc<HeadlessWindow>);

impl HasWindowHandle for HeadlessHandle {
    fn window_handle(&self) -> Result<RawWindow<'_>, HandleError> {
        self.0.window_handle()
    }
}

impl HasDisplayHandle for HeadlessHandle {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.0.display_handle()
    }
}

impl PrismWindow for Arc<HeadlessWindow> {
    fn inner_size(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Acquire),
            self.height.load(Ordering::Acquire),
        )
    }

    fn scale_factor(&self) -> f64 {
        1.0
    }

    fn clone_handle_arc(&self) -> PrismWindowHandle {
        Arc::new(HeadlessHandle(Arc::clone(self)))
    }

    fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_window_reports_size_and_no_handle() {
        let window = HeadlessWindow::new(640, 480);
        assert_eq!(window.inner_size(), (640, 480));
        window.set_inner_size(800, 600);
        assert_eq!(window.inner_size(), (800, 600));
        assert!(window.window_handle().is_err());
        assert!(window.clone_handle_arc().display_handle().is_err());
    }

    #[test]
    fn test_headless_ids_are_unique() {
        let a = HeadlessWindow::new(1, 1);
        let b = HeadlessWindow::new(1, 1);
        assert_ne!(PrismWindow::id(&a), PrismWindow::id(&b));
    }
}
