//! Positions an external application's top-level window over a host UI
//! container so it appears embedded.

pub mod cancel;
pub mod decoration;
pub mod error;
pub mod geometry;
pub mod manager;
pub mod messages;
pub mod metrics;
pub mod platform;
pub mod process;
pub mod simulated;
pub mod state;
pub mod sync;
pub mod tracker;

pub use decoration::{ChromeElement, DecorationOutcome, DecorationRemover};
pub use error::{DecorationError, FailureReason, OverlayError, PlatformError};
pub use geometry::{
    host_window_of, BoundsSample, ContainerBounds, ContainerRef, CoordinateSystem,
    FixedContainer, HostGeometry, HostWindowId, LocalBounds, OriginConvention, ScreenRect,
};
pub use manager::{ManagerConfig, OverlayManager, SessionStatus};
pub use messages::{OverlayEvent, OverlayEventKind};
pub use metrics::SyncMetrics;
pub use platform::{native_backend, WindowBackend, WindowHandle};
pub use process::{LaunchSpec, NativeLauncher, ProcessLauncher};
pub use simulated::SimulatedDesktop;
pub use state::{SessionId, SessionState};
pub use sync::{PositionSyncEngine, SyncConfig, SyncLifecycle};
pub use tracker::{DiscoveryStrategy, TrackerConfig, WindowTracker};
