//! Per-call access to the current request.
//!
//! Code running during a call can reach the active [`Request`] without having
//! it threaded through every signature. The slot is never process-wide:
//!
//! - Synchronous hosts use a thread-local slot written by
//!   [`Request::capture`](crate::http::Request::capture).
//! - Async hosts wrap each call in [`scope`], which binds the request to the
//!   running task. Tasks migrate between worker threads, so a thread-local
//!   slot would leak requests across calls there.
//!
//! [`current`] checks the task scope first, then the thread-local slot.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use crate::http::Request;

thread_local! {
    static THREAD_CURRENT: RefCell<Option<Arc<Request>>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_CURRENT: Arc<Request>;
}

/// Makes `request` the current request of the calling thread.
pub fn set_current(request: Arc<Request>) {
    THREAD_CURRENT.with(|slot| *slot.borrow_mut() = Some(request));
}

/// Clears the calling thread's current request, returning it.
pub fn take_current() -> Option<Arc<Request>> {
    THREAD_CURRENT.with(|slot| slot.borrow_mut().take())
}

/// Returns the request bound to the running task, or else the calling
/// thread's current request.
pub fn current() -> Option<Arc<Request>> {
    TASK_CURRENT
        .try_with(Arc::clone)
        .ok()
        .or_else(|| THREAD_CURRENT.with(|slot| slot.borrow().clone()))
}

/// Runs `fut` with `request` bound as the current request of the task.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use httpkit::{context, http::{Request, Sources}};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let request = Arc::new(Request::from_sources(Sources::new().query([("id", "7")])));
/// let id = context::scope(request, async {
///     context::current().and_then(|r| r.str("id").map(str::to_owned))
/// })
/// .await;
/// assert_eq!(id.as_deref(), Some("7"));
/// # }
/// ```
pub async fn scope<F: Future>(request: Arc<Request>, fut: F) -> F::Output {
    TASK_CURRENT.scope(request, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Sources;

    fn request(id: &str) -> Arc<Request> {
        Arc::new(Request::from_sources(Sources::new().query([("id", id)])))
    }

    #[test]
    fn cleared_thread_has_no_current() {
        take_current();
        assert!(current().is_none());
    }

    #[test]
    fn set_and_take() {
        let req = request("1");
        set_current(Arc::clone(&req));
        assert!(Arc::ptr_eq(&current().unwrap(), &req));
        assert!(take_current().is_some());
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn task_scope_hides_thread_slot() {
        set_current(request("thread"));
        let seen = scope(request("task"), async {
            current().and_then(|r| r.str("id").map(str::to_owned))
        })
        .await;
        assert_eq!(seen.as_deref(), Some("task"));
        assert_eq!(current().unwrap().str("id"), Some("thread"));
    }

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        let a = tokio::spawn(scope(request("a"), async {
            tokio::task::yield_now().await;
            current().unwrap().str("id").map(str::to_owned)
        }));
        let b = tokio::spawn(scope(request("b"), async {
            tokio::task::yield_now().await;
            current().unwrap().str("id").map(str::to_owned)
        }));
        assert_eq!(a.await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("b"));
    }
}
