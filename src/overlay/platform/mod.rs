//! OS window access. Everything above this module talks to [`WindowBackend`].

use std::sync::Arc;
use std::time::Instant;

use crate::overlay::decoration::ChromeElement;
use crate::overlay::error::PlatformError;
use crate::overlay::geometry::{HostGeometry, HostWindowId, ScreenRect};

#[cfg(windows)]
pub mod win32;

/// Opaque top-level window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowHandle(pub u64);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// A visible top-level window as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub pid: u32,
    pub title: String,
    pub class: String,
    /// Creation time, when the platform can report it.
    pub created_at: Option<Instant>,
}

/// Which chrome elements a window currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChromeState {
    pub title_bar: bool,
    pub resize_border: bool,
    pub taskbar_entry: bool,
}

impl ChromeState {
    pub fn has(&self, element: ChromeElement) -> bool {
        match element {
            ChromeElement::TitleBar => self.title_bar,
            ChromeElement::ResizeBorder => self.resize_border,
            ChromeElement::TaskbarEntry => self.taskbar_entry,
        }
    }

    pub fn present(&self) -> Vec<ChromeElement> {
        ChromeElement::ALL
            .into_iter()
            .filter(|element| self.has(*element))
            .collect()
    }

    pub fn is_chromeless(&self) -> bool {
        !self.title_bar && !self.resize_border && !self.taskbar_entry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZOrder {
    #[default]
    Unchanged,
    Topmost,
}

/// Platform window operations needed by the overlay engine.
///
/// Implementations must be callable from any thread.
pub trait WindowBackend: Send + Sync {
    /// Visible, unowned top-level windows.
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, PlatformError>;
    fn is_window(&self, handle: WindowHandle) -> bool;
    fn window_rect(&self, handle: WindowHandle) -> Result<ScreenRect, PlatformError>;
    /// Combined move + resize.
    fn set_window_rect(
        &self,
        handle: WindowHandle,
        rect: ScreenRect,
        z_order: ZOrder,
    ) -> Result<(), PlatformError>;
    fn chrome_state(&self, handle: WindowHandle) -> Result<ChromeState, PlatformError>;
    fn remove_chrome(&self, handle: WindowHandle, element: ChromeElement)
        -> Result<(), PlatformError>;
    fn host_geometry(&self, host: HostWindowId) -> Option<HostGeometry>;
}

/// Backend for targets without a native implementation.
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl WindowBackend for UnsupportedBackend {
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn is_window(&self, _handle: WindowHandle) -> bool {
        false
    }

    fn window_rect(&self, _handle: WindowHandle) -> Result<ScreenRect, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn set_window_rect(
        &self,
        _handle: WindowHandle,
        _rect: ScreenRect,
        _z_order: ZOrder,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn chrome_state(&self, _handle: WindowHandle) -> Result<ChromeState, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn remove_chrome(
        &self,
        _handle: WindowHandle,
        _element: ChromeElement,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn host_geometry(&self, _host: HostWindowId) -> Option<HostGeometry> {
        None
    }
}

/// The window backend for the platform this binary was built for.
pub fn native_backend() -> Arc<dyn WindowBackend> {
    #[cfg(windows)]
    {
        Arc::new(win32::Win32Backend::default())
    }

    #[cfg(not(windows))]
    {
        Arc::new(UnsupportedBackend)
    }
}
