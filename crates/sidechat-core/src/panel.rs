//! Which panels are open, and what an activation should do.

use std::collections::HashSet;

/// Identifies one host window (a browser tab, a terminal session) that can
/// show the chat panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    Open,
    Close,
    /// No API key yet; show the settings form instead of the panel.
    ShowSettings,
}

#[derive(Debug, Default)]
pub struct PanelCoordinator {
    open: HashSet<TabId>,
}

impl PanelCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles an icon click or shortcut for `tab`.
    pub fn activate(&mut self, tab: TabId, configured: bool) -> PanelAction {
        if !configured {
            tracing::debug!(tab = tab.0, "panel activation without api key");
            return PanelAction::ShowSettings;
        }

        if self.open.remove(&tab) {
            PanelAction::Close
        } else {
            self.open.insert(tab);
            PanelAction::Open
        }
    }

    /// Records a panel that was closed by the host rather than by activation.
    pub fn closed(&mut self, tab: TabId) {
        self.open.remove(&tab);
    }

    pub fn is_open(&self, tab: TabId) -> bool {
        self.open.contains(&tab)
    }
}
