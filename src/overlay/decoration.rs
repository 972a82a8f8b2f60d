use crate::overlay::error::{DecorationError, PlatformError};
use crate::overlay::geometry::ScreenRect;
use crate::overlay::platform::{WindowBackend, WindowHandle, ZOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromeElement {
    TitleBar,
    ResizeBorder,
    TaskbarEntry,
}

impl ChromeElement {
    pub const ALL: [ChromeElement; 3] = [
        ChromeElement::TitleBar,
        ChromeElement::ResizeBorder,
        ChromeElement::TaskbarEntry,
    ];
}

impl std::fmt::Display for ChromeElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChromeElement::TitleBar => write!(f, "title bar"),
            ChromeElement::ResizeBorder => write!(f, "resize border"),
            ChromeElement::TaskbarEntry => write!(f, "taskbar entry"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecorationOutcome {
    Stripped,
    /// Nothing to do; the window had no chrome left.
    AlreadyChromeless,
    /// Some elements could not be removed. The overlay is still usable.
    Partial { remaining: Vec<ChromeElement> },
}

impl DecorationOutcome {
    pub fn remaining(&self) -> &[ChromeElement] {
        match self {
            DecorationOutcome::Partial { remaining } => remaining,
            _ => &[],
        }
    }
}

pub struct DecorationRemover<'a> {
    backend: &'a dyn WindowBackend,
}

impl<'a> DecorationRemover<'a> {
    pub fn new(backend: &'a dyn WindowBackend) -> Self {
        Self { backend }
    }

    /// Remove the title bar, resize border and taskbar entry of `window`.
    ///
    /// `restore` is the last known container rect; it is re-applied when the
    /// platform moved or resized the window while changing its style. Without
    /// it the pre-mutation rect is put back instead.
    pub fn strip(
        &self,
        window: WindowHandle,
        restore: Option<ScreenRect>,
    ) -> Result<DecorationOutcome, DecorationError> {
        let before = self.backend.chrome_state(window).map_err(|err| map_err(window, err))?;
        let pending = before.present();
        if pending.is_empty() {
            tracing::debug!(%window, "window already chromeless");
            return Ok(DecorationOutcome::AlreadyChromeless);
        }

        let rect_before = self
            .backend
            .window_rect(window)
            .map_err(|err| map_err(window, err))?;

        let mut failures = Vec::new();
        for element in &pending {
            match self.backend.remove_chrome(window, *element) {
                Ok(()) => tracing::debug!(%window, %element, "removed window chrome"),
                Err(PlatformError::WindowGone(_)) => {
                    return Err(DecorationError::WindowGone(window));
                }
                Err(err) => {
                    tracing::warn!(%window, %element, %err, "could not remove window chrome");
                    failures.push(err.to_string());
                }
            }
        }

        self.restore_geometry(window, rect_before, restore)?;

        let after = self.backend.chrome_state(window).map_err(|err| map_err(window, err))?;
        let remaining = after.present();
        if remaining.is_empty() {
            return Ok(DecorationOutcome::Stripped);
        }
        if remaining.len() == pending.len() {
            let reason = if failures.is_empty() {
                "platform ignored every style change".to_string()
            } else {
                failures.join("; ")
            };
            return Err(DecorationError::Rejected(reason));
        }
        Ok(DecorationOutcome::Partial { remaining })
    }

    fn restore_geometry(
        &self,
        window: WindowHandle,
        rect_before: ScreenRect,
        restore: Option<ScreenRect>,
    ) -> Result<(), DecorationError> {
        let current = self
            .backend
            .window_rect(window)
            .map_err(|err| map_err(window, err))?;
        let wanted = restore.unwrap_or(rect_before);
        if current == wanted {
            return Ok(());
        }
        tracing::debug!(%window, ?current, ?wanted, "style change moved window, re-applying bounds");
        match self.backend.set_window_rect(window, wanted, ZOrder::Unchanged) {
            Ok(()) => Ok(()),
            Err(PlatformError::WindowGone(_)) => Err(DecorationError::WindowGone(window)),
            Err(err) => {
                tracing::warn!(%window, %err, "failed to re-apply bounds after style change");
                Ok(())
            }
        }
    }
}

fn map_err(window: WindowHandle, err: PlatformError) -> DecorationError {
    match err {
        PlatformError::WindowGone(_) => DecorationError::WindowGone(window),
        other => DecorationError::Rejected(other.to_string()),
    }
}
