//! Conversion of host UI container bounds into absolute screen rectangles.

use std::sync::Mutex;

use raw_window_handle::{HasWindowHandle, RawWindowHandle};

use crate::overlay::platform::WindowBackend;

/// Rectangle in absolute, top-left-origin screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// True when every edge differs by less than `tolerance` pixels.
    pub fn approx_eq(&self, other: &ScreenRect, tolerance: i32) -> bool {
        let tolerance = tolerance.max(1).unsigned_abs();
        self.x.abs_diff(other.x) < tolerance
            && self.y.abs_diff(other.y) < tolerance
            && self.width.abs_diff(other.width) < tolerance
            && self.height.abs_diff(other.height) < tolerance
    }

    pub fn contains_point(&self, point: (i32, i32)) -> bool {
        point.0 >= self.x
            && point.0 < self.x.saturating_add(self.width)
            && point.1 >= self.y
            && point.1 < self.y.saturating_add(self.height)
    }
}

/// Where a platform puts the origin of its screen coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginConvention {
    TopLeft,
    /// y grows upward from the bottom edge of the primary display.
    BottomLeft,
}

/// Container bounds as reported by the host UI, in logical units relative to
/// the host window's content area (top-left origin, y down).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl LocalBounds {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Opaque id of a host window, as understood by the active [`WindowBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostWindowId(pub u64);

impl HostWindowId {
    /// Pseudo host covering the primary display at scale 1; local bounds of a
    /// container hosted here are already screen coordinates.
    pub const DESKTOP: HostWindowId = HostWindowId(0);

    pub fn from_raw(handle: RawWindowHandle) -> Option<Self> {
        match handle {
            RawWindowHandle::Win32(h) => Some(Self(h.hwnd.get() as u64)),
            RawWindowHandle::Xlib(h) => Some(Self(h.window as u64)),
            RawWindowHandle::Xcb(h) => Some(Self(h.window.get() as u64)),
            RawWindowHandle::AppKit(h) => Some(Self(h.ns_view.as_ptr() as usize as u64)),
            _ => None,
        }
    }
}

/// Resolve the [`HostWindowId`] of any window exposing a raw handle.
pub fn host_window_of(window: &impl HasWindowHandle) -> Option<HostWindowId> {
    let handle = window.window_handle().ok()?;
    HostWindowId::from_raw(handle.as_raw())
}

/// Current placement of a host window, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostGeometry {
    /// Top-left corner of the content area in physical pixels, expressed in
    /// the platform's own [`OriginConvention`].
    pub content_origin: (f64, f64),
    /// Physical pixels per logical unit (DPI scale times any content zoom).
    pub scale_factor: f64,
    pub origin: OriginConvention,
    /// Height of the primary display; only used to flip bottom-left origins.
    pub desktop_height: f64,
    /// Monitor the host currently sits on, top-left normalised.
    pub monitor: ScreenRect,
    pub minimized: bool,
}

impl HostGeometry {
    pub fn desktop(monitor: ScreenRect) -> Self {
        Self {
            content_origin: (monitor.x as f64, monitor.y as f64),
            scale_factor: 1.0,
            origin: OriginConvention::TopLeft,
            desktop_height: monitor.height as f64,
            monitor,
            minimized: false,
        }
    }
}

/// Host UI element whose geometry defines where the overlay appears.
///
/// Implementations must be cheap to query; they are read once per sync tick
/// from a background thread. The engine never mutates a container.
pub trait ContainerRef: Send + Sync {
    /// Bounds relative to the host window's content area, or `None` when the
    /// element is not laid out.
    fn local_bounds(&self) -> Option<LocalBounds>;
    fn host_window(&self) -> HostWindowId;
}

/// Container whose bounds are set explicitly, e.g. a fixed desktop region or
/// a host that pushes layout changes instead of being queried.
#[derive(Debug)]
pub struct FixedContainer {
    host: HostWindowId,
    bounds: Mutex<Option<LocalBounds>>,
}

impl FixedContainer {
    pub fn new(host: HostWindowId, bounds: LocalBounds) -> Self {
        Self {
            host,
            bounds: Mutex::new(Some(bounds)),
        }
    }

    /// Absolute screen rectangle on the desktop pseudo host.
    pub fn on_desktop(rect: ScreenRect) -> Self {
        Self::new(
            HostWindowId::DESKTOP,
            LocalBounds::new(
                rect.x as f64,
                rect.y as f64,
                rect.width as f64,
                rect.height as f64,
            ),
        )
    }

    pub fn set_bounds(&self, bounds: LocalBounds) {
        *self.bounds.lock().unwrap_or_else(|p| p.into_inner()) = Some(bounds);
    }

    pub fn set_rect(&self, rect: ScreenRect) {
        self.set_bounds(LocalBounds::new(
            rect.x as f64,
            rect.y as f64,
            rect.width as f64,
            rect.height as f64,
        ));
    }

    /// Stop reporting bounds, as if the element was removed from layout.
    pub fn unmount(&self) {
        *self.bounds.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl ContainerRef for FixedContainer {
    fn local_bounds(&self) -> Option<LocalBounds> {
        *self.bounds.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn host_window(&self) -> HostWindowId {
        self.host
    }
}

/// Snapshot of a container's screen placement for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerBounds {
    pub rect: ScreenRect,
    /// Top-left corner of the monitor the container is on.
    pub screen_origin: (i32, i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsSample {
    Visible(ContainerBounds),
    /// Container or host hidden, minimized or gone. Sync must pause.
    Hidden,
}

impl BoundsSample {
    pub fn visible(self) -> Option<ContainerBounds> {
        match self {
            BoundsSample::Visible(bounds) => Some(bounds),
            BoundsSample::Hidden => None,
        }
    }
}

pub struct CoordinateSystem;

impl CoordinateSystem {
    /// Translate local container bounds into absolute screen pixels.
    pub fn to_screen(local: LocalBounds, host: &HostGeometry) -> BoundsSample {
        if host.minimized || !(local.width > 0.0 && local.height > 0.0) {
            return BoundsSample::Hidden;
        }
        let scale = if host.scale_factor.is_finite() && host.scale_factor > 0.0 {
            host.scale_factor
        } else {
            1.0
        };

        let left = host.content_origin.0 + local.x * scale;
        let top = match host.origin {
            OriginConvention::TopLeft => host.content_origin.1 + local.y * scale,
            OriginConvention::BottomLeft => {
                host.desktop_height - host.content_origin.1 + local.y * scale
            }
        };
        let right = left + local.width * scale;
        let bottom = top + local.height * scale;

        let rect = ScreenRect {
            x: left.round() as i32,
            y: top.round() as i32,
            width: (right.round() as i32).saturating_sub(left.round() as i32),
            height: (bottom.round() as i32).saturating_sub(top.round() as i32),
        };
        if rect.is_empty() {
            return BoundsSample::Hidden;
        }
        BoundsSample::Visible(ContainerBounds {
            rect,
            screen_origin: (host.monitor.x, host.monitor.y),
        })
    }

    /// Gather the inputs for `container` and resolve them for this tick.
    pub fn sample(container: &dyn ContainerRef, backend: &dyn WindowBackend) -> BoundsSample {
        let Some(local) = container.local_bounds() else {
            return BoundsSample::Hidden;
        };
        match backend.host_geometry(container.host_window()) {
            Some(host) => Self::to_screen(local, &host),
            None => BoundsSample::Hidden,
        }
    }
}

/// Pick the monitor containing `point`, falling back to the first one.
pub fn select_monitor_for_point(monitors: &[ScreenRect], point: (i32, i32)) -> Option<ScreenRect> {
    monitors
        .iter()
        .copied()
        .find(|rect| rect.contains_point(point))
        .or_else(|| monitors.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(origin: (f64, f64), scale: f64) -> HostGeometry {
        HostGeometry {
            content_origin: origin,
            scale_factor: scale,
            origin: OriginConvention::TopLeft,
            desktop_height: 1080.0,
            monitor: ScreenRect::new(0, 0, 1920, 1080),
            minimized: false,
        }
    }

    #[test]
    fn offsets_by_host_position_and_scale() {
        let sample = CoordinateSystem::to_screen(
            LocalBounds::new(10.0, 20.0, 400.0, 300.0),
            &host((200.0, 100.0), 1.5),
        );
        assert_eq!(
            sample.visible().map(|b| b.rect),
            Some(ScreenRect::new(215, 130, 600, 450))
        );
    }

    #[test]
    fn bottom_left_origin_is_flipped() {
        let mut geometry = host((100.0, 900.0), 1.0);
        geometry.origin = OriginConvention::BottomLeft;
        let sample = CoordinateSystem::to_screen(LocalBounds::new(0.0, 50.0, 300.0, 200.0), &geometry);
        assert_eq!(
            sample.visible().map(|b| b.rect),
            Some(ScreenRect::new(100, 230, 300, 200))
        );
    }

    #[test]
    fn negative_monitor_offsets_are_preserved() {
        let mut geometry = host((-1800.0, 40.0), 1.0);
        geometry.monitor = ScreenRect::new(-1920, 0, 1920, 1080);
        let bounds = CoordinateSystem::to_screen(LocalBounds::new(0.0, 0.0, 640.0, 480.0), &geometry)
            .visible()
            .expect("container should be visible");
        assert_eq!(bounds.rect, ScreenRect::new(-1800, 40, 640, 480));
        assert_eq!(bounds.screen_origin, (-1920, 0));
    }

    #[test]
    fn zero_sized_or_minimized_containers_are_hidden() {
        assert_eq!(
            CoordinateSystem::to_screen(LocalBounds::default(), &host((0.0, 0.0), 1.0)),
            BoundsSample::Hidden
        );
        let mut minimized = host((0.0, 0.0), 1.0);
        minimized.minimized = true;
        assert_eq!(
            CoordinateSystem::to_screen(LocalBounds::new(0.0, 0.0, 100.0, 100.0), &minimized),
            BoundsSample::Hidden
        );
    }

    #[test]
    fn adjacent_fractional_containers_share_an_edge() {
        let geometry = host((0.0, 0.0), 1.25);
        let left = CoordinateSystem::to_screen(LocalBounds::new(0.0, 0.0, 101.0, 10.0), &geometry)
            .visible()
            .map(|b| b.rect)
            .expect("left visible");
        let right = CoordinateSystem::to_screen(LocalBounds::new(101.0, 0.0, 50.0, 10.0), &geometry)
            .visible()
            .map(|b| b.rect)
            .expect("right visible");
        assert_eq!(left.x + left.width, right.x);
    }

    #[test]
    fn tolerance_ignores_sub_threshold_deltas() {
        let a = ScreenRect::new(100, 100, 800, 600);
        assert!(a.approx_eq(&ScreenRect::new(101, 99, 801, 600), 2));
        assert!(!a.approx_eq(&ScreenRect::new(102, 100, 800, 600), 2));
    }

    #[test]
    fn extreme_coordinates_saturate_instead_of_overflowing() {
        let far = ScreenRect::new(i32::MIN, i32::MAX, i32::MAX, 10);
        let near = ScreenRect::new(i32::MAX, i32::MIN, 0, 10);
        assert!(!far.approx_eq(&near, 2));
        assert!(far.approx_eq(&far, 2));
        assert!(!far.contains_point((0, 0)));

        let sample = CoordinateSystem::to_screen(
            LocalBounds::new(-1e12, 0.0, 2e12, 100.0),
            &host((0.0, 0.0), 1.0),
        );
        let rect = sample.visible().map(|b| b.rect).expect("wide container is visible");
        assert_eq!((rect.x, rect.width), (i32::MIN, i32::MAX));

        let offscreen = CoordinateSystem::to_screen(
            LocalBounds::new(1e12, 0.0, 50.0, 100.0),
            &host((0.0, 0.0), 1.0),
        );
        assert_eq!(offscreen, BoundsSample::Hidden);
    }

    #[test]
    fn monitor_selection_prefers_containing_monitor() {
        let monitors = [
            ScreenRect::new(-1920, 0, 1920, 1080),
            ScreenRect::new(0, 0, 2560, 1440),
        ];
        assert_eq!(select_monitor_for_point(&monitors, (-10, 100)), Some(monitors[0]));
        assert_eq!(select_monitor_for_point(&monitors, (200, 100)), Some(monitors[1]));
        assert_eq!(select_monitor_for_point(&monitors, (9000, 9000)), Some(monitors[0]));
    }
}
