use std::ffi::c_void;

use windows::Win32::Foundation::{
    GetLastError, SetLastError, BOOL, HWND, LPARAM, POINT, RECT, WIN32_ERROR,
};
use windows::Win32::Graphics::Gdi::{
    ClientToScreen, GetMonitorInfoW, MonitorFromWindow, MONITORINFOEXW, MONITOR_DEFAULTTONEAREST,
};
use windows::Win32::UI::HiDpi::GetDpiForWindow;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetClientRect, GetSystemMetrics, GetWindow, GetWindowLongPtrW,
    GetWindowRect, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsIconic,
    IsWindow, IsWindowVisible, SetWindowLongPtrW, SetWindowPos, ShowWindow, GWL_EXSTYLE,
    GWL_STYLE, GW_OWNER, HWND_TOPMOST, SET_WINDOW_POS_FLAGS, SM_CXSCREEN, SM_CYSCREEN,
    SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER,
    SW_HIDE, SW_SHOWNA, WINDOW_LONG_PTR_INDEX, WS_CAPTION, WS_EX_APPWINDOW, WS_EX_TOOLWINDOW,
    WS_THICKFRAME,
};

use crate::overlay::decoration::ChromeElement;
use crate::overlay::error::PlatformError;
use crate::overlay::geometry::{HostGeometry, HostWindowId, OriginConvention, ScreenRect};
use crate::overlay::platform::{ChromeState, WindowBackend, WindowHandle, WindowInfo, ZOrder};

/// Win32 implementation on top of the `windows` crate.
#[derive(Debug, Default)]
pub struct Win32Backend;

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as usize as *mut c_void)
}

fn handle_of(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as usize as u64)
}

/// Synchronous on purpose: the rect must have changed when the call returns.
/// The sync engine bounds the call on its own worker thread.
fn move_flags(z_order: ZOrder) -> (HWND, SET_WINDOW_POS_FLAGS) {
    match z_order {
        ZOrder::Topmost => (HWND_TOPMOST, SWP_NOACTIVATE),
        ZOrder::Unchanged => (HWND::default(), SWP_NOACTIVATE | SWP_NOZORDER),
    }
}

fn wide_to_string(value: &[u16]) -> String {
    let nul = value.iter().position(|c| *c == 0).unwrap_or(value.len());
    String::from_utf16_lossy(&value[..nul])
}

fn os_error(call: &'static str, err: windows::core::Error) -> PlatformError {
    PlatformError::Os {
        call,
        message: err.message().to_string(),
    }
}

fn window_title(hwnd: HWND) -> String {
    unsafe {
        let len = GetWindowTextLengthW(hwnd);
        if len <= 0 {
            return String::new();
        }
        let mut buf = vec![0u16; len as usize + 1];
        let read = GetWindowTextW(hwnd, &mut buf);
        if read <= 0 {
            return String::new();
        }
        String::from_utf16_lossy(&buf[..read as usize])
    }
}

fn window_class(hwnd: HWND) -> String {
    let mut buf = vec![0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    if len <= 0 {
        return String::new();
    }
    wide_to_string(&buf[..len as usize])
}

fn read_long(hwnd: HWND, index: WINDOW_LONG_PTR_INDEX) -> u32 {
    unsafe { GetWindowLongPtrW(hwnd, index) as u32 }
}

fn write_long(
    hwnd: HWND,
    index: WINDOW_LONG_PTR_INDEX,
    value: u32,
) -> Result<(), PlatformError> {
    unsafe {
        SetLastError(WIN32_ERROR(0));
        let previous = SetWindowLongPtrW(hwnd, index, value as isize);
        if previous == 0 && GetLastError() != WIN32_ERROR(0) {
            return Err(PlatformError::Os {
                call: "SetWindowLongPtrW",
                message: format!("error code {}", GetLastError().0),
            });
        }
    }
    if read_long(hwnd, index) != value {
        return Err(PlatformError::Os {
            call: "SetWindowLongPtrW",
            message: "style change was not retained".into(),
        });
    }
    Ok(())
}

fn refresh_frame(hwnd: HWND) -> Result<(), PlatformError> {
    unsafe {
        SetWindowPos(
            hwnd,
            HWND::default(),
            0,
            0,
            0,
            0,
            SWP_FRAMECHANGED | SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
        )
    }
    .map_err(|err| os_error("SetWindowPos", err))
}

impl Win32Backend {
    fn ensure_window(&self, handle: WindowHandle) -> Result<HWND, PlatformError> {
        let hwnd = hwnd(handle);
        if unsafe { IsWindow(hwnd) }.as_bool() {
            Ok(hwnd)
        } else {
            Err(PlatformError::WindowGone(handle))
        }
    }

    fn desktop_geometry(&self) -> HostGeometry {
        let (width, height) =
            unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        HostGeometry::desktop(ScreenRect::new(0, 0, width, height))
    }
}

impl WindowBackend for Win32Backend {
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, PlatformError> {
        unsafe extern "system" fn enum_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
            let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);
            if !IsWindowVisible(hwnd).as_bool() {
                return BOOL(1);
            }
            if !GetWindow(hwnd, GW_OWNER).unwrap_or_default().0.is_null() {
                return BOOL(1);
            }
            let mut pid = 0u32;
            let _ = GetWindowThreadProcessId(hwnd, Some(&mut pid));
            if pid == 0 {
                return BOOL(1);
            }
            windows.push(WindowInfo {
                handle: handle_of(hwnd),
                pid,
                title: window_title(hwnd),
                class: window_class(hwnd),
                created_at: None,
            });
            BOOL(1)
        }

        let mut windows: Vec<WindowInfo> = Vec::new();
        unsafe {
            let windows_ptr = &mut windows as *mut Vec<WindowInfo>;
            EnumWindows(Some(enum_cb), LPARAM(windows_ptr as isize))
                .map_err(|err| os_error("EnumWindows", err))?;
        }
        Ok(windows)
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindow(hwnd(handle)) }.as_bool()
    }

    fn window_rect(&self, handle: WindowHandle) -> Result<ScreenRect, PlatformError> {
        let hwnd = self.ensure_window(handle)?;
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd, &mut rect) }.map_err(|err| os_error("GetWindowRect", err))?;
        Ok(ScreenRect::new(
            rect.left,
            rect.top,
            rect.right - rect.left,
            rect.bottom - rect.top,
        ))
    }

    fn set_window_rect(
        &self,
        handle: WindowHandle,
        rect: ScreenRect,
        z_order: ZOrder,
    ) -> Result<(), PlatformError> {
        let hwnd = self.ensure_window(handle)?;
        let (insert_after, flags) = move_flags(z_order);
        unsafe {
            SetWindowPos(
                hwnd,
                insert_after,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                flags,
            )
        }
        .map_err(|err| os_error("SetWindowPos", err))
    }

    fn chrome_state(&self, handle: WindowHandle) -> Result<ChromeState, PlatformError> {
        let hwnd = self.ensure_window(handle)?;
        let style = read_long(hwnd, GWL_STYLE);
        let ex_style = read_long(hwnd, GWL_EXSTYLE);
        Ok(ChromeState {
            title_bar: style & WS_CAPTION.0 != 0,
            resize_border: style & WS_THICKFRAME.0 != 0,
            taskbar_entry: ex_style & WS_EX_APPWINDOW.0 != 0
                || ex_style & WS_EX_TOOLWINDOW.0 == 0,
        })
    }

    fn remove_chrome(
        &self,
        handle: WindowHandle,
        element: ChromeElement,
    ) -> Result<(), PlatformError> {
        let hwnd = self.ensure_window(handle)?;
        match element {
            ChromeElement::TitleBar => {
                let style = read_long(hwnd, GWL_STYLE);
                write_long(hwnd, GWL_STYLE, style & !WS_CAPTION.0)?;
            }
            ChromeElement::ResizeBorder => {
                let style = read_long(hwnd, GWL_STYLE);
                write_long(hwnd, GWL_STYLE, style & !WS_THICKFRAME.0)?;
            }
            ChromeElement::TaskbarEntry => {
                let ex_style = read_long(hwnd, GWL_EXSTYLE);
                let updated = (ex_style & !WS_EX_APPWINDOW.0) | WS_EX_TOOLWINDOW.0;
                // The taskbar only re-reads the style when the window is re-shown.
                unsafe {
                    let _ = ShowWindow(hwnd, SW_HIDE);
                }
                let result = write_long(hwnd, GWL_EXSTYLE, updated);
                unsafe {
                    let _ = ShowWindow(hwnd, SW_SHOWNA);
                }
                result?;
            }
        }
        refresh_frame(hwnd)
    }

    fn host_geometry(&self, host: HostWindowId) -> Option<HostGeometry> {
        if host == HostWindowId::DESKTOP {
            return Some(self.desktop_geometry());
        }
        let hwnd = HWND(host.0 as usize as *mut c_void);
        unsafe {
            if !IsWindow(hwnd).as_bool() {
                return None;
            }
            let minimized = IsIconic(hwnd).as_bool();

            let mut client = RECT::default();
            GetClientRect(hwnd, &mut client).ok()?;
            let mut origin = POINT { x: 0, y: 0 };
            if !ClientToScreen(hwnd, &mut origin).as_bool() {
                return None;
            }

            let dpi = GetDpiForWindow(hwnd);
            let scale_factor = if dpi == 0 { 1.0 } else { dpi as f64 / 96.0 };

            let monitor = MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST);
            let mut info = MONITORINFOEXW::default();
            info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
            let monitor_rect = if GetMonitorInfoW(monitor, &mut info as *mut _ as *mut _).as_bool()
            {
                let rc = info.monitorInfo.rcMonitor;
                ScreenRect::new(rc.left, rc.top, rc.right - rc.left, rc.bottom - rc.top)
            } else {
                self.desktop_geometry().monitor
            };

            Some(HostGeometry {
                content_origin: (origin.x as f64, origin.y as f64),
                scale_factor,
                origin: OriginConvention::TopLeft,
                desktop_height: 0.0,
                monitor: monitor_rect,
                minimized: minimized || client.right <= client.left,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::UI::WindowsAndMessaging::SWP_ASYNCWINDOWPOS;

    #[test]
    fn moves_are_applied_synchronously() {
        for z_order in [ZOrder::Topmost, ZOrder::Unchanged] {
            let (_, flags) = move_flags(z_order);
            assert_eq!(flags.0 & SWP_ASYNCWINDOWPOS.0, 0);
            assert_ne!(flags.0 & SWP_NOACTIVATE.0, 0);
        }
        assert_eq!(move_flags(ZOrder::Topmost).0, HWND_TOPMOST);
        assert_ne!(move_flags(ZOrder::Unchanged).1 .0 & SWP_NOZORDER.0, 0);
    }
}
