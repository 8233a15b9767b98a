//! # Backend Resolution
//!
//! A client does not know where the leader for a given cookie lives. It asks a
//! [`ShardLeaderResolver`] (supplied by the concrete client) and caches the answer in a
//! [`BackendInfoResolver`].
//!
//! ## Concurrency
//!
//! Unlike the rest of the client, the resolver is shared: lookups are started from the
//! actor task while the resulting futures complete on whatever task polls them. The
//! cache is therefore a [`DashMap`] and every mutation goes through a single entry-level
//! operation:
//!
//! - lookups use compute-if-absent, so concurrent callers for the same cookie share one
//!   in-flight future and the leader is only asked once;
//! - invalidation is compare-and-remove, so a stale invalidation cannot discard a
//!   fresher resolution that replaced the entry in the meantime.

use crate::error::RequestError;
use crate::message::{AccessProtocol, ProtocolVersion, Request};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Address of a backend actor.
pub struct BackendRef<P: AccessProtocol> {
    sender: mpsc::Sender<Request<P>>,
}

impl<P: AccessProtocol> BackendRef<P> {
    pub fn new(sender: mpsc::Sender<Request<P>>) -> Self {
        Self { sender }
    }

    /// Hands a request to the backend without waiting.
    ///
    /// A full or closed mailbox is reported, not retried: the request stays queued on
    /// the client and the timeout path takes care of resending it.
    pub fn send(&self, request: Request<P>) -> Result<(), RequestError> {
        self.sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RequestError::BackendUnavailable("backend mailbox full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                RequestError::BackendUnavailable("backend stopped".to_string())
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<P: AccessProtocol> Clone for BackendRef<P> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<P: AccessProtocol> PartialEq for BackendRef<P> {
    fn eq(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl<P: AccessProtocol> Debug for BackendRef<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRef")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Where the backend for a cookie lives and which protocol version it speaks.
pub struct BackendInfo<P: AccessProtocol> {
    cookie: u64,
    actor: BackendRef<P>,
    version: ProtocolVersion,
}

impl<P: AccessProtocol> BackendInfo<P> {
    pub fn new(cookie: u64, actor: BackendRef<P>, version: ProtocolVersion) -> Self {
        Self {
            cookie,
            actor,
            version,
        }
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn actor(&self) -> &BackendRef<P> {
        &self.actor
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
}

impl<P: AccessProtocol> Clone for BackendInfo<P> {
    fn clone(&self) -> Self {
        Self {
            cookie: self.cookie,
            actor: self.actor.clone(),
            version: self.version,
        }
    }
}

impl<P: AccessProtocol> PartialEq for BackendInfo<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cookie == other.cookie && self.version == other.version && self.actor == other.actor
    }
}

impl<P: AccessProtocol> Debug for BackendInfo<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendInfo")
            .field("cookie", &self.cookie)
            .field("version", &self.version)
            .field("actor", &self.actor)
            .finish()
    }
}

/// A cached, possibly still running, backend lookup.
pub type BackendFuture<P> = Shared<BoxFuture<'static, Result<BackendInfo<P>, RequestError>>>;

/// The concrete strategy used to locate the leader for a cookie.
pub trait ShardLeaderResolver<P: AccessProtocol>: Send + Sync + 'static {
    /// Starts looking up the current leader for `cookie`.
    fn get_shard_leader(
        &self,
        cookie: u64,
    ) -> BoxFuture<'static, Result<(BackendRef<P>, ProtocolVersion), RequestError>>;

    /// Called after `info` has been evicted from the cache.
    fn invalidate_backend_info(&self, _info: &BackendInfo<P>) {}
}

/// Caches backend lookups per cookie.
pub struct BackendInfoResolver<P: AccessProtocol> {
    strategy: Arc<dyn ShardLeaderResolver<P>>,
    backends: DashMap<u64, BackendFuture<P>>,
}

impl<P: AccessProtocol> BackendInfoResolver<P> {
    pub fn new(strategy: Arc<dyn ShardLeaderResolver<P>>) -> Self {
        Self {
            strategy,
            backends: DashMap::new(),
        }
    }

    /// Returns the cached lookup for `cookie`, starting one if there is none.
    ///
    /// A lookup that already failed is replaced, so a resolution error only sticks
    /// until the next caller asks again.
    pub fn get_backend_info(&self, cookie: u64) -> BackendFuture<P> {
        match self.backends.entry(cookie) {
            Entry::Occupied(mut entry) => {
                if matches!(entry.get().peek(), Some(Err(_))) {
                    debug!(cookie, "Replacing failed backend lookup");
                    let fresh = self.resolve_backend_info(cookie);
                    entry.insert(fresh.clone());
                    fresh
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                let fresh = self.resolve_backend_info(cookie);
                entry.insert(fresh.clone());
                fresh
            }
        }
    }

    /// Evicts `info` if it is still what the cache holds for `cookie`.
    ///
    /// Returns `false` (and leaves the cache alone) when the entry is missing, still
    /// resolving, or already points somewhere else.
    pub fn invalidate_backend(&self, cookie: u64, info: &BackendInfo<P>) -> bool {
        let removed = self.backends.remove_if(&cookie, |_, cached| {
            matches!(cached.peek(), Some(Ok(current)) if current == info)
        });

        if removed.is_some() {
            info!(cookie, version = %info.version(), "Invalidated backend");
            self.strategy.invalidate_backend_info(info);
            true
        } else {
            debug!(cookie, "Stale invalidation ignored");
            false
        }
    }

    /// The resolved backend for `cookie`, if the lookup has completed successfully.
    pub fn cached(&self, cookie: u64) -> Option<BackendInfo<P>> {
        self.backends
            .get(&cookie)
            .and_then(|cached| cached.peek().and_then(|r| r.as_ref().ok().cloned()))
    }

    fn resolve_backend_info(&self, cookie: u64) -> BackendFuture<P> {
        debug!(cookie, "Resolving backend");
        let lookup = self.strategy.get_shard_leader(cookie);
        async move {
            let (actor, version) = lookup.await?;
            Ok(BackendInfo::new(cookie, actor, version))
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Probe;

    impl AccessProtocol for Probe {
        type Target = u64;
        type Request = ();
        type Success = ();

        fn cookie(target: &u64) -> u64 {
            *target
        }
    }

    /// Hands out a new backend channel on every lookup and counts lookups.
    #[derive(Default)]
    struct CountingResolver {
        lookups: AtomicUsize,
        invalidated: AtomicUsize,
        gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
        receivers: Mutex<Vec<mpsc::Receiver<Request<Probe>>>>,
    }

    impl ShardLeaderResolver<Probe> for CountingResolver {
        fn get_shard_leader(
            &self,
            _cookie: u64,
        ) -> BoxFuture<'static, Result<(BackendRef<Probe>, ProtocolVersion), RequestError>>
        {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let (sender, receiver) = mpsc::channel(4);
            self.receivers.lock().unwrap().push(receiver);
            let gate = self.gate.lock().unwrap().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok((BackendRef::new(sender), ProtocolVersion::CURRENT))
            }
            .boxed()
        }

        fn invalidate_backend_info(&self, _info: &BackendInfo<Probe>) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_resolution() {
        let strategy = Arc::new(CountingResolver::default());
        let (open, gate) = tokio::sync::oneshot::channel();
        *strategy.gate.lock().unwrap() = Some(gate);
        let resolver = Arc::new(BackendInfoResolver::new(strategy.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            tasks.push(tokio::spawn(
                async move { resolver.get_backend_info(7).await },
            ));
        }
        tokio::task::yield_now().await;
        open.send(()).unwrap();

        let mut infos = Vec::new();
        for task in tasks {
            infos.push(task.await.unwrap().unwrap());
        }

        assert_eq!(strategy.lookups.load(Ordering::SeqCst), 1);
        assert!(infos.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_invalidate_removes_matching_entry() {
        let strategy = Arc::new(CountingResolver::default());
        let resolver = BackendInfoResolver::new(strategy.clone());

        let info = resolver.get_backend_info(1).await.unwrap();
        assert!(resolver.invalidate_backend(1, &info));
        assert_eq!(strategy.invalidated.load(Ordering::SeqCst), 1);
        assert!(resolver.cached(1).is_none());

        let fresh = resolver.get_backend_info(1).await.unwrap();
        assert_ne!(fresh, info);
        assert_eq!(strategy.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_invalidate_keeps_fresher_resolution() {
        let strategy = Arc::new(CountingResolver::default());
        let resolver = BackendInfoResolver::new(strategy.clone());

        let stale = resolver.get_backend_info(1).await.unwrap();
        assert!(resolver.invalidate_backend(1, &stale));
        let fresh = resolver.get_backend_info(1).await.unwrap();

        // A second invalidation carrying the old value must not touch the new one.
        assert!(!resolver.invalidate_backend(1, &stale));
        assert_eq!(resolver.cached(1), Some(fresh));
        assert_eq!(strategy.invalidated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_ignores_lookup_in_flight() {
        let strategy = Arc::new(CountingResolver::default());
        let resolver = BackendInfoResolver::new(strategy.clone());

        let stale = resolver.get_backend_info(1).await.unwrap();
        assert!(resolver.invalidate_backend(1, &stale));

        let (_open, gate) = tokio::sync::oneshot::channel::<()>();
        *strategy.gate.lock().unwrap() = Some(gate);
        let _pending = resolver.get_backend_info(1);

        assert!(!resolver.invalidate_backend(1, &stale));
        assert_eq!(strategy.lookups.load(Ordering::SeqCst), 2);
    }

    struct FailingOnce {
        lookups: AtomicUsize,
        keep: Mutex<Vec<mpsc::Receiver<Request<Probe>>>>,
    }

    impl ShardLeaderResolver<Probe> for FailingOnce {
        fn get_shard_leader(
            &self,
            _cookie: u64,
        ) -> BoxFuture<'static, Result<(BackendRef<Probe>, ProtocolVersion), RequestError>>
        {
            let attempt = self.lookups.fetch_add(1, Ordering::SeqCst);
            let (sender, receiver) = mpsc::channel(1);
            self.keep.lock().unwrap().push(receiver);
            async move {
                if attempt == 0 {
                    Err(RequestError::BackendUnavailable("no leader".to_string()))
                } else {
                    Ok((BackendRef::new(sender), ProtocolVersion::CURRENT))
                }
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried() {
        let strategy = Arc::new(FailingOnce {
            lookups: AtomicUsize::new(0),
            keep: Mutex::new(Vec::new()),
        });
        let resolver = BackendInfoResolver::new(strategy.clone());

        assert!(resolver.get_backend_info(3).await.is_err());
        assert!(resolver.get_backend_info(3).await.is_ok());
        assert_eq!(strategy.lookups.load(Ordering::SeqCst), 2);
    }
}
