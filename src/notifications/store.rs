//! In-memory notification store for the authenticated user.
//!
//! Holds the newest-first record list, the unread counter and the paging
//! state. The unread counter starts from the backend's figure on every page
//! fetch and is then adjusted by exactly one on each local mutation; it is
//! never recomputed by scanning the list, so it can drift from the list if
//! mutations race with fetches.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::effects::{self, EffectSettings, NotificationEffects, Permission};
use super::models::NotificationRecord;
use crate::api::coalesce::{self, RequestKey};
use crate::api::{ApiError, NotificationPage, NotificationsApi};

pub const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Invalid page number: {0}")]
    InvalidPage(u32),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub per_page: u32,
    pub sound_enabled: bool,
    pub desktop_enabled: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            sound_enabled: true,
            desktop_enabled: false,
        }
    }
}

/// Observable state of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub records: Vec<NotificationRecord>,
    pub unread_count: u64,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<String>,
    /// Last page applied, 0 before the first fetch.
    pub current_page: u32,
    pub stats: Option<serde_json::Value>,
}

impl StoreSnapshot {
    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

pub struct NotificationStore {
    api: Arc<dyn NotificationsApi>,
    effects: Arc<dyn NotificationEffects>,
    per_page: u32,
    state: watch::Sender<StoreSnapshot>,
    /// Guard for page > 1 fetches, one per store.
    paging: AtomicBool,
    loads: AtomicUsize,
    /// Bumped on reset; completions started under an older epoch are dropped.
    epoch: AtomicU64,
    sound_enabled: AtomicBool,
    desktop_enabled: AtomicBool,
}

/// Keeps `loading` set while alive.
struct LoadingGuard<'a> {
    store: &'a NotificationStore,
}

impl<'a> LoadingGuard<'a> {
    fn new(store: &'a NotificationStore) -> Self {
        store.loads.fetch_add(1, Ordering::SeqCst);
        store.state.send_if_modified(|s| !std::mem::replace(&mut s.loading, true));
        Self { store }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.store.loads.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.store
                .state
                .send_if_modified(|s| std::mem::replace(&mut s.loading, false));
        }
    }
}

struct PagingGuard<'a>(&'a AtomicBool);

impl Drop for PagingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl NotificationStore {
    pub fn new(
        api: Arc<dyn NotificationsApi>,
        effects: Arc<dyn NotificationEffects>,
        settings: StoreSettings,
    ) -> Self {
        let (state, _) = watch::channel(StoreSnapshot::default());
        Self {
            api,
            effects,
            per_page: settings.per_page.max(1),
            state,
            paging: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            sound_enabled: AtomicBool::new(settings.sound_enabled),
            desktop_enabled: AtomicBool::new(settings.desktop_enabled),
        }
    }

    // =========================================================================
    // Reading
    // =========================================================================

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that observes every change of the store.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.state.subscribe()
    }

    pub fn unread_count(&self) -> u64 {
        self.state.borrow().unread_count
    }

    pub fn len(&self) -> usize {
        self.state.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_more(&self) -> bool {
        self.state.borrow().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn clear_error(&self) {
        self.state
            .send_if_modified(|s| s.error.take().is_some());
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.sound_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Toggle desktop notifications. Enabling asks for permission when the
    /// user has not decided yet; returns the permission in effect.
    pub fn set_desktop_enabled(&self, enabled: bool) -> Permission {
        self.desktop_enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            effects::ensure_desktop_permission(self.effects.as_ref())
        } else {
            self.effects.desktop_permission()
        }
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    /// Fetch page `page` of the notification list.
    ///
    /// Page 1 replaces the whole list and is coalesced process-wide with any
    /// identical fetch of the same session. Later pages are appended, skipping
    /// ids already present, and are a no-op while another later-page fetch of
    /// this store is running. Failures are recorded in the store's error and
    /// yield `None`.
    pub async fn fetch_page(&self, page: u32) -> Option<Arc<NotificationPage>> {
        match page {
            0 => {
                self.record_error(StoreError::InvalidPage(page).to_string());
                None
            }
            1 => self.fetch_first_page().await,
            _ => self.fetch_later_page(page).await,
        }
    }

    /// Fetch the page after the last applied one, if there might be one.
    pub async fn fetch_next_page(&self) -> Option<Arc<NotificationPage>> {
        let (current_page, has_more) = {
            let state = self.state.borrow();
            (state.current_page, state.has_more)
        };
        if current_page == 0 {
            return self.fetch_page(1).await;
        }
        if !has_more {
            debug!("No more notification pages after {}", current_page);
            return None;
        }
        self.fetch_page(current_page + 1).await
    }

    async fn fetch_first_page(&self) -> Option<Arc<NotificationPage>> {
        let epoch = self.current_epoch();
        let _loading = LoadingGuard::new(self);

        let api = self.api.clone();
        let per_page = self.per_page;
        let result = coalesce::coalesce(RequestKey::first_page(api.scope()), move || async move {
            api.fetch_page(1, per_page).await.map(Arc::new)
        })
        .await;

        match result {
            Ok(page) => {
                if !self.is_current(epoch) {
                    debug!("Discarding first page fetched before store reset");
                    return None;
                }
                self.state.send_modify(|s| {
                    let mut seen = HashSet::new();
                    s.records = page
                        .records()
                        .iter()
                        .filter(|r| seen.insert(r.id.clone()))
                        .cloned()
                        .collect();
                    s.unread_count = page.unread_count;
                    s.has_more = page.may_have_more(per_page);
                    s.current_page = 1;
                    s.stats = page.stats.clone();
                    s.error = None;
                });
                Some(page)
            }
            Err(e) => {
                warn!("Failed to fetch notifications: {}", e);
                if self.is_current(epoch) {
                    self.record_error(format!("Failed to load notifications: {}", e));
                }
                None
            }
        }
    }

    async fn fetch_later_page(&self, page_number: u32) -> Option<Arc<NotificationPage>> {
        if self.paging.swap(true, Ordering::SeqCst) {
            debug!(
                "Page fetch already in flight, ignoring request for page {}",
                page_number
            );
            return None;
        }
        let _paging = PagingGuard(&self.paging);
        let epoch = self.current_epoch();
        let _loading = LoadingGuard::new(self);

        match self.api.fetch_page(page_number, self.per_page).await {
            Ok(page) => {
                if !self.is_current(epoch) {
                    debug!("Discarding page {} fetched before store reset", page_number);
                    return None;
                }
                let per_page = self.per_page;
                self.state.send_modify(|s| {
                    let mut seen: HashSet<String> = s.records.iter().map(|r| r.id.clone()).collect();
                    let before = s.records.len();
                    s.records.extend(
                        page.records()
                            .iter()
                            .filter(|r| seen.insert(r.id.clone()))
                            .cloned(),
                    );
                    let skipped = page.records().len() - (s.records.len() - before);
                    if skipped > 0 {
                        debug!("Skipped {} already known notifications on page {}", skipped, page_number);
                    }
                    s.unread_count = page.unread_count;
                    s.has_more = page.may_have_more(per_page);
                    s.current_page = page_number;
                    if page.stats.is_some() {
                        s.stats = page.stats.clone();
                    }
                    s.error = None;
                });
                Some(Arc::new(page))
            }
            Err(e) => {
                warn!("Failed to fetch notifications page {}: {}", page_number, e);
                if self.is_current(epoch) {
                    self.record_error(format!("Failed to load notifications: {}", e));
                }
                None
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Mark one notification as read.
    ///
    /// Applied locally first; a backend failure is recorded in the store's
    /// error and the local change is kept. Unknown or already read ids are a
    /// no-op.
    pub async fn mark_read(&self, id: &str) {
        let now = Utc::now();
        let changed = self.state.send_if_modified(|s| {
            match s.records.iter_mut().find(|r| r.id == id) {
                Some(record) if record.is_unread() => {
                    record.read_at = Some(now);
                    s.unread_count = s.unread_count.saturating_sub(1);
                    true
                }
                _ => false,
            }
        });
        if !changed {
            debug!("Notification {} is unknown or already read", id);
            return;
        }

        if let Err(e) = self.api.mark_read(id).await {
            warn!("Failed to mark notification {} as read: {}", id, e);
            self.record_error(format!("Failed to mark notification as read: {}", e));
        }
    }

    /// Mark every held notification as read and zero the unread counter.
    pub async fn mark_all_read(&self) {
        let now = Utc::now();
        self.state.send_modify(|s| {
            for record in s.records.iter_mut().filter(|r| r.is_unread()) {
                record.read_at = Some(now);
            }
            s.unread_count = 0;
        });

        if let Err(e) = self.api.mark_all_read().await {
            warn!("Failed to mark all notifications as read: {}", e);
            self.record_error(format!("Failed to mark all notifications as read: {}", e));
        }
    }

    /// Remove one notification, decrementing the unread counter if it was
    /// unread. Applied locally first, like [`Self::mark_read`].
    pub async fn delete_one(&self, id: &str) {
        let removed = self.state.send_if_modified(|s| {
            let Some(index) = s.records.iter().position(|r| r.id == id) else {
                return false;
            };
            let record = s.records.remove(index);
            if record.is_unread() {
                s.unread_count = s.unread_count.saturating_sub(1);
            }
            true
        });
        if !removed {
            debug!("Notification {} not held, nothing to delete", id);
            return;
        }

        if let Err(e) = self.api.delete(id).await {
            warn!("Failed to delete notification {}: {}", id, e);
            self.record_error(format!("Failed to delete notification: {}", e));
        }
    }

    /// Delete every notification.
    ///
    /// The only operation whose failure reaches the caller: local state is
    /// left untouched until the backend confirms.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        if let Err(e) = self.api.clear_all().await {
            warn!("Failed to clear notifications: {}", e);
            self.record_error(format!("Failed to clear notifications: {}", e));
            return Err(e.into());
        }

        self.state.send_modify(|s| {
            s.records.clear();
            s.unread_count = 0;
            s.has_more = false;
            s.error = None;
        });
        Ok(())
    }

    /// Apply an event from the push channel.
    ///
    /// Returns `true` if the notification was new: it is then prepended, the
    /// unread counter goes up by one and the sound/desktop effects fire.
    /// Events whose id is already held are dropped.
    pub fn receive_realtime(&self, event: serde_json::Value) -> bool {
        let record = NotificationRecord::from_realtime(event, Utc::now());

        let inserted = self.state.send_if_modified(|s| {
            if s.contains(&record.id) {
                return false;
            }
            s.records.insert(0, record.clone());
            s.unread_count += 1;
            true
        });

        if inserted {
            debug!("New real-time notification {}", record.id);
            effects::dispatch(self.effects.clone(), self.effect_settings(), &record);
        } else {
            debug!("Dropping duplicate real-time notification {}", record.id);
        }
        inserted
    }

    /// Forget everything held for the current session.
    ///
    /// Completions of requests started before the reset are discarded, and
    /// the process-wide first-page request of this session is released so the
    /// next session does not join it.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        coalesce::reset_scope(&self.api.scope());
        self.state.send_modify(|s| {
            *s = StoreSnapshot {
                loading: s.loading,
                ..StoreSnapshot::default()
            };
        });
    }

    fn effect_settings(&self) -> EffectSettings {
        EffectSettings {
            sound_enabled: self.sound_enabled.load(Ordering::SeqCst),
            desktop_enabled: self.desktop_enabled.load(Ordering::SeqCst),
        }
    }

    fn record_error(&self, message: String) {
        self.state.send_modify(|s| s.error = Some(message));
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }
}
