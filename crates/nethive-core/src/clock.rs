//! A testable time abstraction: a `Clock` trait with a real `SystemClock`
//! implementation, so retry/backoff timing can be mocked in tests.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Abstraction over wall-clock time so discovery/bootstrap retry timers are testable.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

/// The real clock, backed by `tokio::time::sleep` and the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
