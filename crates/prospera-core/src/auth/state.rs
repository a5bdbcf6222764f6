//! Session state projection and distribution.
//!
//! `SessionState` is a pure projection of the stored credential and its
//! claims. There is one live instance per manager; it is replaced wholesale
//! on every recompute and distributed through a watch channel, so
//! subscribers always see the latest value and are woken for every change.

use tokio::sync::watch;

use super::codec;

/// Who the client currently is, as far as the UI needs to know.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub is_authenticated: bool,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Raw application role names (technical roles already removed).
    pub roles: Vec<String>,
}

impl SessionState {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// First role formatted for display.
    pub fn display_role(&self) -> Option<String> {
        self.roles.first().map(|role| codec::format_role_label(role))
    }
}

/// Lifecycle notifications for external collaborators (navigation, UI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn,
    LoggedOut,
    RefreshSucceeded,
    RefreshFailed,
    TokenExpired,
}

/// Single owned state cell behind a subscribe/notify seam.
pub(crate) struct SessionPublisher {
    tx: watch::Sender<SessionState>,
}

impl SessionPublisher {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::anonymous());
        Self { tx }
    }

    pub(crate) fn publish(&self, state: SessionState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}
