//! Client side of the hospital backend's REST notification API.

mod client;
pub mod coalesce;
mod models;

pub use client::{ApiError, HttpNotificationsApi, NotificationsApi};
pub use models::{Ack, NotificationPage, PageData};
