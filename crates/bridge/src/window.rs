//! Window state the guest can query
//!
//! Tracked from the host events flowing through `Bridge::dispatch`,
//! whether or not the guest captures them.

use serde::{Deserialize, Serialize};
use tracing::debug;
use ward_dom::Viewport;

use crate::events::HostEvent;

/// `get_visibility_state` codes
pub const VISIBLE: u32 = 0;
pub const HIDDEN: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub viewport: Viewport,
    pub hidden: bool,
    pub focused: bool,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            hidden: false,
            focused: true,
        }
    }
}

impl WindowState {
    pub fn observe(&mut self, event: &HostEvent) {
        match *event {
            HostEvent::Resize { width, height } => {
                self.viewport = Viewport {
                    width: f64::from(width.max(0)),
                    height: f64::from(height.max(0)),
                };
            }
            HostEvent::VisibilityChange { hidden } => {
                self.hidden = hidden;
                // A hidden page cannot hold focus
                if hidden {
                    self.focused = false;
                }
            }
            _ => {}
        }
    }

    pub fn focus(&mut self) {
        if self.hidden {
            debug!("focus_window ignored while hidden");
            return;
        }
        self.focused = true;
    }

    pub fn visibility_code(&self) -> u32 {
        if self.hidden {
            HIDDEN
        } else {
            VISIBLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_resize_and_visibility() {
        let mut window = WindowState::default();
        assert_eq!(window.visibility_code(), VISIBLE);

        window.observe(&HostEvent::Resize {
            width: 390,
            height: -1,
        });
        assert_eq!(window.viewport.width, 390.0);
        assert_eq!(window.viewport.height, 0.0);

        window.observe(&HostEvent::VisibilityChange { hidden: true });
        assert_eq!(window.visibility_code(), HIDDEN);
        window.focus();
        assert!(!window.focused);

        window.observe(&HostEvent::VisibilityChange { hidden: false });
        window.focus();
        assert!(window.focused);
    }
}
