//! Side effects of a newly arrived notification: a short sound and a
//! desktop-level notification.
//!
//! Both are optional platform capabilities. Failures and missing support are
//! logged and swallowed; they never reach the store or its caller.

use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::models::NotificationRecord;

/// Platform permission state for desktop notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// The user has not been asked yet.
    Prompt,
    /// The platform has no notification API at all.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EffectError {
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Blocked by platform: {0}")]
    Blocked(String),

    #[error("Effect failed: {0}")]
    Failed(String),
}

/// What clicking a desktop notification should do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    FocusWindow,
    Navigate(String),
}

/// A desktop notification built from a record.
#[derive(Debug, Clone, PartialEq)]
pub struct DesktopNotification {
    /// Record id, lets the platform replace rather than stack duplicates.
    pub tag: String,
    pub title: String,
    pub body: Option<String>,
    pub action_url: Option<String>,
}

impl DesktopNotification {
    pub fn from_record(record: &NotificationRecord) -> Self {
        Self {
            tag: record.id.clone(),
            title: record
                .payload
                .title
                .clone()
                .unwrap_or_else(|| "New notification".to_string()),
            body: record.payload.message.clone(),
            action_url: record.payload.action_url.clone(),
        }
    }

    pub fn click_actions(&self) -> Vec<ClickAction> {
        let mut actions = vec![ClickAction::FocusWindow];
        if let Some(url) = &self.action_url {
            actions.push(ClickAction::Navigate(url.clone()));
        }
        actions
    }
}

/// Platform hooks fired for genuinely new real-time notifications.
pub trait NotificationEffects: Send + Sync {
    fn play_sound(&self) -> Result<(), EffectError>;

    fn desktop_permission(&self) -> Permission;

    /// Ask the user for desktop notification permission and return the
    /// resulting state. Platforms without a prompt report the current state.
    fn request_desktop_permission(&self) -> Permission {
        self.desktop_permission()
    }

    /// Show `notification`. When the user clicks it, the implementation
    /// performs `notification.click_actions()` in order.
    fn show_desktop(&self, notification: &DesktopNotification) -> Result<(), EffectError>;
}

/// Resolve the desktop permission, prompting the user if they have not been
/// asked yet.
pub fn ensure_desktop_permission(effects: &dyn NotificationEffects) -> Permission {
    let current = effects.desktop_permission();
    if current != Permission::Prompt {
        return current;
    }

    let granted = effects.request_desktop_permission();
    match granted {
        Permission::Granted => info!("Desktop notification permission granted"),
        other => info!("Desktop notification permission not granted: {:?}", other),
    }
    granted
}

/// Local switches for the two effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectSettings {
    pub sound_enabled: bool,
    pub desktop_enabled: bool,
}

/// Fire the effects for `record` without blocking the caller.
///
/// Inside a tokio runtime the work goes to the blocking pool; outside one it
/// runs inline.
pub fn dispatch(
    effects: Arc<dyn NotificationEffects>,
    settings: EffectSettings,
    record: &NotificationRecord,
) {
    if !settings.sound_enabled && !settings.desktop_enabled {
        return;
    }

    let notification = DesktopNotification::from_record(record);
    let job = move || run_effects(effects.as_ref(), settings, &notification);

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(job);
        }
        Err(_) => job(),
    }
}

fn run_effects(
    effects: &dyn NotificationEffects,
    settings: EffectSettings,
    notification: &DesktopNotification,
) {
    if settings.sound_enabled {
        if let Err(e) = effects.play_sound() {
            debug!("Notification sound not played: {}", e);
        }
    }

    if settings.desktop_enabled {
        match effects.desktop_permission() {
            Permission::Granted => {
                if let Err(e) = effects.show_desktop(notification) {
                    debug!("Desktop notification {} not shown: {}", notification.tag, e);
                }
            }
            permission => {
                debug!(
                    "Skipping desktop notification {}: permission {:?}",
                    notification.tag, permission
                );
            }
        }
    }
}

/// Effects that do nothing; desktop notifications report as unsupported.
pub struct NoEffects;

impl NotificationEffects for NoEffects {
    fn play_sound(&self) -> Result<(), EffectError> {
        Ok(())
    }

    fn desktop_permission(&self) -> Permission {
        Permission::Unsupported
    }

    fn show_desktop(&self, _notification: &DesktopNotification) -> Result<(), EffectError> {
        Err(EffectError::Unavailable("desktop notifications".to_string()))
    }
}

/// Effects for a terminal session: the sound is the terminal bell, there is
/// no desktop notification API.
pub struct TerminalEffects;

impl NotificationEffects for TerminalEffects {
    fn play_sound(&self) -> Result<(), EffectError> {
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| EffectError::Failed(e.to_string()))
    }

    fn desktop_permission(&self) -> Permission {
        Permission::Unsupported
    }

    fn show_desktop(&self, _notification: &DesktopNotification) -> Result<(), EffectError> {
        Err(EffectError::Unavailable("desktop notifications".to_string()))
    }
}
