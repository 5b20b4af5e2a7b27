//! Shared constants for end-to-end tests
//!
//! When the fake backend's fixtures change (credentials, seeded ids),
//! update only this file.

#![allow(dead_code)]

// ============================================================================
// Test User
// ============================================================================

/// Bearer token the fake backend accepts
pub const TEST_TOKEN: &str = "test-token-123";

/// Id of the authenticated test user
pub const TEST_USER_ID: &str = "42";

/// Push channel the test user is allowed to subscribe to
pub const TEST_CHANNEL: &str = "private-notifications.42";

// ============================================================================
// Seeded Notifications (newest first)
// ============================================================================

/// Unread lab result notification
pub const LAB_RESULT_ID: &str = "n-lab-1";

/// Unread appointment notification
pub const APPOINTMENT_ID: &str = "n-appt-1";

/// Already read billing notification
pub const INVOICE_ID: &str = "n-bill-1";

/// Unread seeded notifications
pub const SEEDED_UNREAD: u64 = 2;

// ============================================================================
// Timing
// ============================================================================

/// Maximum time to wait for the backend to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for the backend
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Maximum time to wait for an asynchronous condition in a test
pub const CONDITION_TIMEOUT_MS: u64 = 5000;
