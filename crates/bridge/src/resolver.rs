//! Async I/O Resolver Bridge
//!
//! Design decisions:
//! 1. Every capability is a request/response pair correlated by an opaque
//!    `ResolverToken` the guest chose. The bridge never interprets it.
//! 2. Requests run as tokio tasks; the only thing that comes back is a
//!    `Completion` on an unbounded channel.
//! 3. The bridge drains that channel one completion at a time, so the guest
//!    is never re-entered concurrently.
//! 4. Fail with sentinels, never with errors. A task that dies still
//!    settles with its fallback completion.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

use crate::platform::Platform;
use crate::resources::ByteResource;

/// Guest-chosen correlation token, passed back untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolverToken(pub u32);

impl ResolverToken {
    pub fn value(self) -> u32 {
        self.0
    }
}

/// The settled outcome of one capability request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Fetch { token: ResolverToken, status: u16, body: Vec<u8> },
    Timer { token: ResolverToken },
    KvOpen { token: ResolverToken, ok: bool },
    Kv { token: ResolverToken, ok: bool },
    KvGet { token: ResolverToken, value: Option<Vec<u8>> },
    Clipboard { token: ResolverToken, ok: bool },
    FileOpen { token: ResolverToken, file: Option<ByteResource> },
    Decompress { token: ResolverToken, data: Option<Vec<u8>> },
    Permission { token: ResolverToken, granted: bool },
    PushSubscribe { token: ResolverToken, subscription: Option<String> },
    PushSubscription { token: ResolverToken, subscription: Option<String> },
    PushUnsubscribe { token: ResolverToken, ok: bool },
    PendingPushes { token: ResolverToken, json: Vec<u8> },
    PendingPushesCleared { token: ResolverToken },
}

impl Completion {
    pub fn token(&self) -> ResolverToken {
        match self {
            Completion::Fetch { token, .. }
            | Completion::Timer { token }
            | Completion::KvOpen { token, .. }
            | Completion::Kv { token, .. }
            | Completion::KvGet { token, .. }
            | Completion::Clipboard { token, .. }
            | Completion::FileOpen { token, .. }
            | Completion::Decompress { token, .. }
            | Completion::Permission { token, .. }
            | Completion::PushSubscribe { token, .. }
            | Completion::PushSubscription { token, .. }
            | Completion::PushUnsubscribe { token, .. }
            | Completion::PendingPushes { token, .. }
            | Completion::PendingPushesCleared { token } => *token,
        }
    }

    /// Capability name, for logs and bus notifications
    pub fn capability(&self) -> &'static str {
        match self {
            Completion::Fetch { .. } => "fetch",
            Completion::Timer { .. } => "timer",
            Completion::KvOpen { .. } => "kv_open",
            Completion::Kv { .. } => "kv",
            Completion::KvGet { .. } => "kv_get",
            Completion::Clipboard { .. } => "clipboard",
            Completion::FileOpen { .. } => "file_open",
            Completion::Decompress { .. } => "decompress",
            Completion::Permission { .. } => "notification_permission",
            Completion::PushSubscribe { .. } => "push_subscribe",
            Completion::PushSubscription { .. } => "push_subscription",
            Completion::PushUnsubscribe { .. } => "push_unsubscribe",
            Completion::PendingPushes { .. } => "pending_pushes",
            Completion::PendingPushesCleared { .. } => "clear_pending_pushes",
        }
    }
}

/// Issues capability requests and counts the ones not yet delivered
pub struct Resolver {
    platform: Arc<dyn Platform>,
    tx: mpsc::UnboundedSender<Completion>,
    in_flight: usize,
}

impl Resolver {
    pub fn new(platform: Arc<dyn Platform>) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = Self {
            platform,
            tx,
            in_flight: 0,
        };
        (resolver, rx)
    }

    pub fn platform(&self) -> Arc<dyn Platform> {
        self.platform.clone()
    }

    /// Requests issued but not yet handed to the guest
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Called by the bridge once a completion has been taken off the queue
    pub(crate) fn settled(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Queue a result that is already known. It is still delivered
    /// asynchronously, after the current guest call returns.
    pub fn resolve(&mut self, completion: Completion) {
        self.in_flight += 1;
        if self.tx.send(completion).is_err() {
            self.settled();
        }
    }

    /// Run `task` on the runtime and deliver its output. Without a runtime,
    /// or if the task dies, `fallback` is delivered instead.
    pub fn spawn<F>(&mut self, fallback: Completion, task: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            warn!(capability = fallback.capability(), "no async runtime, failing request");
            return self.resolve(fallback);
        };

        self.in_flight += 1;
        let tx = self.tx.clone();
        handle.spawn(async move {
            let completion = match tokio::spawn(task).await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(capability = fallback.capability(), "capability task failed: {}", e);
                    fallback
                }
            };
            let _ = tx.send(completion); // Receiver gone means the bridge is gone
        });
    }

    /// Run blocking work on tokio's blocking pool and deliver its output
    pub fn spawn_blocking<F>(&mut self, fallback: Completion, work: F)
    where
        F: FnOnce() -> Completion + Send + 'static,
    {
        let fallback_on_panic = fallback.clone();
        self.spawn(fallback, async move {
            tokio::task::spawn_blocking(work)
                .await
                .unwrap_or(fallback_on_panic)
        });
    }

    /// Fire-and-forget platform work that produces no completion
    pub fn detach<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => warn!("no async runtime, dropping detached request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HeadlessPlatform;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawned_requests_settle_through_the_channel() {
        let (mut resolver, mut rx) = Resolver::new(HeadlessPlatform::new().into_shared());

        resolver.spawn(Completion::Timer { token: ResolverToken(1) }, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Completion::Timer { token: ResolverToken(1) }
        });
        resolver.resolve(Completion::Clipboard {
            token: ResolverToken(2),
            ok: true,
        });
        assert_eq!(resolver.in_flight(), 2);

        // Immediate results arrive first
        assert_eq!(rx.recv().await.unwrap().token(), ResolverToken(2));
        resolver.settled();
        assert_eq!(rx.recv().await.unwrap().token(), ResolverToken(1));
        resolver.settled();
        assert_eq!(resolver.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_delivers_fallback() {
        let (mut resolver, mut rx) = Resolver::new(HeadlessPlatform::new().into_shared());
        let fallback = Completion::Decompress {
            token: ResolverToken(9),
            data: None,
        };

        resolver.spawn_blocking(fallback.clone(), || panic!("corrupt stream"));

        assert_eq!(rx.recv().await.unwrap(), fallback);
    }

    #[test]
    fn test_no_runtime_fails_fast() {
        let (mut resolver, mut rx) = Resolver::new(HeadlessPlatform::new().into_shared());
        resolver.spawn(
            Completion::Kv {
                token: ResolverToken(3),
                ok: false,
            },
            async {
                Completion::Kv {
                    token: ResolverToken(3),
                    ok: true,
                }
            },
        );

        let completion = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(
            completion,
            Completion::Kv {
                token: ResolverToken(3),
                ok: false
            }
        );
    }
}
