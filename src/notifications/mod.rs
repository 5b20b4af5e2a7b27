//! User notifications: records, the in-memory store and the side effects of
//! new arrivals.

pub mod effects;
mod models;
mod store;

pub use effects::{
    ClickAction, DesktopNotification, EffectError, EffectSettings, NoEffects,
    NotificationEffects, Permission, TerminalEffects,
};
pub use models::{local_id, NotificationPayload, NotificationRecord, Priority};
pub use store::{NotificationStore, StoreError, StoreSettings, StoreSnapshot, DEFAULT_PER_PAGE};

#[cfg(test)]
pub(crate) use store::test_support;
