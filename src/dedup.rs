//! Per-connection in-flight operation guard.
//!
//! Duplicated client events (double-clicks, retries on a flaky link) must not
//! double-apply lobby or referee operations. `begin` claims a
//! `(connection, operation)` token; a second claim before `end` is refused.
//! A 30 s watchdog force-releases leaked tokens with a diagnostic; it does not
//! undo whatever the stuck handler already did.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

const WATCHDOG: Duration = Duration::from_secs(30);

type Key = (String, String);

pub struct RequestDeduper {
    inflight: Arc<Mutex<HashMap<Key, JoinHandle<()>>>>,
}

impl RequestDeduper {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Claim the token. Returns false while an earlier claim is outstanding.
    pub fn begin(&self, conn: &str, op: &str) -> bool {
        let key = (conn.to_string(), op.to_string());
        let mut inflight = self.inflight.lock().expect("dedup lock");
        if inflight.contains_key(&key) {
            return false;
        }

        let map = Arc::clone(&self.inflight);
        let watch_key = key.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(WATCHDOG).await;
            let mut inflight = map.lock().expect("dedup lock");
            if inflight.remove(&watch_key).is_some() {
                warn!(
                    conn = %watch_key.0,
                    op = %watch_key.1,
                    "in-flight token released by watchdog"
                );
            }
        });
        inflight.insert(key, watchdog);
        true
    }

    pub fn end(&self, conn: &str, op: &str) {
        let key = (conn.to_string(), op.to_string());
        let mut inflight = self.inflight.lock().expect("dedup lock");
        if let Some(watchdog) = inflight.remove(&key) {
            watchdog.abort();
        }
    }

    /// Release every token the connection still holds (connection closed).
    pub fn cleanup(&self, conn: &str) {
        let mut inflight = self.inflight.lock().expect("dedup lock");
        inflight.retain(|(c, _), watchdog| {
            if c == conn {
                watchdog.abort();
                false
            } else {
                true
            }
        });
    }
}

impl Default for RequestDeduper {
    fn default() -> Self {
        Self::new()
    }
}
