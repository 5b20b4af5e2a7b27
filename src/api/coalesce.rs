//! Process-wide coalescing of identical in-flight requests.
//!
//! The first caller for a key starts the request; everybody arriving while
//! it runs awaits the same shared future and receives the same result. The
//! entry is released when the request finishes, fails, panics or is dropped,
//! so a failed request never wedges later ones.

use futures::future::{BoxFuture, FutureExt, Shared};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::client::ApiError;
use super::models::NotificationPage;

/// Kind of request that can be coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Page 1 of the notification list (the reconciling full fetch).
    FirstPage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub kind: RequestKind,
    pub scope: String,
}

impl RequestKey {
    pub fn first_page(scope: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::FirstPage,
            scope: scope.into(),
        }
    }
}

pub type PageResult = Result<Arc<NotificationPage>, ApiError>;

type SharedPage = Shared<BoxFuture<'static, PageResult>>;

struct InFlight {
    generation: u64,
    future: SharedPage,
}

lazy_static! {
    static ref IN_FLIGHT: Mutex<HashMap<RequestKey, InFlight>> = Mutex::new(HashMap::new());
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn in_flight() -> MutexGuard<'static, HashMap<RequestKey, InFlight>> {
    IN_FLIGHT.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes its entry when dropped, unless the slot already belongs to a
/// newer request.
struct Release {
    key: RequestKey,
    generation: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        let released = {
            let mut in_flight = in_flight();
            if in_flight
                .get(&self.key)
                .is_some_and(|entry| entry.generation == self.generation)
            {
                in_flight.remove(&self.key)
            } else {
                None
            }
        };
        drop(released);
    }
}

/// Run `request` unless an identical one is already in flight, in which case
/// join it.
pub async fn coalesce<F, Fut>(key: RequestKey, request: F) -> PageResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = PageResult> + Send + 'static,
{
    let future = {
        let mut in_flight = in_flight();
        match in_flight.get(&key) {
            Some(entry) => {
                debug!("Joining in-flight {:?} request for {}", key.kind, key.scope);
                entry.future.clone()
            }
            None => {
                let generation = NEXT_GENERATION.fetch_add(1, Ordering::SeqCst);
                let release = Release {
                    key: key.clone(),
                    generation,
                };
                let request = request();
                let future = async move {
                    let _release = release;
                    request.await
                }
                .boxed()
                .shared();
                in_flight.insert(
                    key,
                    InFlight {
                        generation,
                        future: future.clone(),
                    },
                );
                future
            }
        }
    };

    future.await
}

/// Whether a request for `key` is currently running.
pub fn is_in_flight(key: &RequestKey) -> bool {
    in_flight().contains_key(key)
}

/// Forget every in-flight entry belonging to `scope`.
///
/// Callers already awaiting keep their result; the next caller starts a
/// fresh request.
pub fn reset_scope(scope: &str) {
    // Entries are dropped outside the lock: dropping the last handle of a
    // request runs its `Release`, which takes the lock again.
    let removed: Vec<InFlight> = {
        let mut in_flight = in_flight();
        let keys: Vec<RequestKey> = in_flight
            .keys()
            .filter(|key| key.scope == scope)
            .cloned()
            .collect();
        keys.iter().filter_map(|key| in_flight.remove(key)).collect()
    };
    drop(removed);
}

/// Forget every in-flight entry of the process.
pub fn reset_all() {
    let removed: Vec<InFlight> = in_flight().drain().map(|(_, entry)| entry).collect();
    drop(removed);
}
