// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation.
//!
//! The coroutine core has no cancellation of its own. A body that should
//! stop on request polls a shared token at its own suspension points and
//! reports the outcome as an ordinary value.
//!
//! Tokens form a tree: cancelling a token also cancels every child made
//! from it, while cancelling a child leaves the parent alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::coro::yield_now;

/// Returned by [`CancelToken::checkpoint`] once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug)]
struct Node {
    flag: AtomicBool,
    parent: Option<Arc<Node>>,
}

impl Node {
    fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// Cancellation flag shared between a body and whoever may stop it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    node: Arc<Node>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            node: Arc::new(Node {
                flag: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// A token cancelled along with this one.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(Node {
                flag: AtomicBool::new(false),
                parent: Some(self.node.clone()),
            }),
        }
    }

    /// Set the cancellation flag.
    pub fn cancel(&self) {
        self.node.flag.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested here or on an ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled()
    }

    /// `Err(Cancelled)` if cancelled, else `Ok`.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Yield to the rest of the worker, then check the flag.
    pub async fn checkpoint(&self) -> Result<(), Cancelled> {
        self.check()?;
        yield_now().await;
        self.check()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::{Task, Worker};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancel_is_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.check(), Err(Cancelled));
    }

    #[test]
    fn cancel_flows_down_not_up() {
        let parent = CancelToken::new();
        let child = parent.child();
        let grandchild = child.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        let parent = CancelToken::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn looping_body_stops_at_checkpoint() {
        let w = Worker::new();
        let token = CancelToken::new();
        let spins = Arc::new(AtomicUsize::new(0));

        let (t, s) = (token.clone(), spins.clone());
        let mut looping = Task::new(async move {
            loop {
                if t.checkpoint().await.is_err() {
                    return s.load(Ordering::SeqCst);
                }
                s.fetch_add(1, Ordering::SeqCst);
            }
        });
        looping.start_on(&w);

        let t = token.clone();
        w.spawn_detached(async move {
            yield_now().await;
            yield_now().await;
            t.cancel();
        });

        w.pump();
        let spun = looping.try_take_output().unwrap();
        assert!(spun >= 1);
        assert_eq!(spun, spins.load(Ordering::SeqCst));
    }
}
