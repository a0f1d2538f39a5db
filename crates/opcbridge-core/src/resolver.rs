// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Tag handle resolution.
//!
//! Every session registers a tag with the driver once and caches the resulting
//! [`HandlePair`]. Each cache entry is a `OnceCell`, so concurrent resolutions of the same
//! tag share a single `add_item` call. The bookkeeping lock only guards the map; the driver
//! call runs outside of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::driver::{LinkHandle, ProtocolDriver, SubscriptionHandle};
use crate::error::{BridgeError, BridgeResult, DriverError};
use crate::types::{ClientHandle, HandlePair, SessionId};

// =============================================================================
// ClientHandleAllocator
// =============================================================================

/// Monotonic source of client correlation ids.
///
/// One allocator lives as long as its connection object, across reconnects, so a client
/// handle is never handed out twice.
#[derive(Debug)]
pub struct ClientHandleAllocator {
    next: AtomicU32,
}

impl ClientHandleAllocator {
    /// Creates an allocator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocates the next handle.
    pub fn allocate(&self) -> ClientHandle {
        ClientHandle(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the handle that will be allocated next.
    pub fn peek(&self) -> ClientHandle {
        ClientHandle(self.next.load(Ordering::SeqCst))
    }
}

impl Default for ClientHandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TagHandleResolver
// =============================================================================

#[derive(Default)]
struct ResolverState {
    entries: HashMap<String, Arc<OnceCell<HandlePair>>>,
    invalidated: bool,
}

/// Per-session cache of tag handles.
pub struct TagHandleResolver {
    session_id: SessionId,
    driver: Arc<dyn ProtocolDriver>,
    link: LinkHandle,
    subscription: SubscriptionHandle,
    allocator: Arc<ClientHandleAllocator>,
    state: Mutex<ResolverState>,
    resolutions: AtomicU64,
    failures: AtomicU64,
}

impl TagHandleResolver {
    /// Creates a resolver bound to one driver subscription.
    pub fn new(
        session_id: SessionId,
        driver: Arc<dyn ProtocolDriver>,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        allocator: Arc<ClientHandleAllocator>,
    ) -> Self {
        Self {
            session_id,
            driver,
            link,
            subscription,
            allocator,
            state: Mutex::new(ResolverState::default()),
            resolutions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Resolves a tag, registering it with the driver on first use.
    ///
    /// # Errors
    ///
    /// - `SessionDetached` once the resolver was invalidated
    /// - `TagResolution` if the driver rejects the tag
    pub async fn resolve(&self, tag: &str) -> BridgeResult<HandlePair> {
        let cell = {
            let mut state = self.state.lock();
            if state.invalidated {
                return Err(BridgeError::detached(self.session_id));
            }
            state.entries.entry(tag.to_string()).or_default().clone()
        };

        if let Some(pair) = cell.get() {
            return Ok(*pair);
        }

        let result = cell
            .get_or_try_init(|| async {
                let client = self.allocator.allocate();
                tracing::debug!(
                    session_id = %self.session_id,
                    tag = tag,
                    client_handle = %client,
                    "Registering tag"
                );
                let server = self
                    .driver
                    .add_item(self.link, self.subscription, tag, client)
                    .await?;
                self.resolutions.fetch_add(1, Ordering::Relaxed);
                Ok::<_, DriverError>(HandlePair::new(server, client))
            })
            .await;

        match result {
            Ok(pair) => {
                if self.state.lock().invalidated {
                    return Err(BridgeError::detached(self.session_id));
                }
                Ok(*pair)
            }
            Err(source) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    session_id = %self.session_id,
                    tag = tag,
                    error = %source,
                    "Tag resolution failed"
                );
                Err(BridgeError::tag_resolution(tag, source))
            }
        }
    }

    /// Resolves several tags concurrently. Results are in input order.
    pub async fn resolve_all<S: AsRef<str>>(&self, tags: &[S]) -> Vec<BridgeResult<HandlePair>> {
        join_all(tags.iter().map(|tag| self.resolve(tag.as_ref()))).await
    }

    /// Returns the cached pair of a tag without contacting the driver.
    pub fn cached(&self, tag: &str) -> Option<HandlePair> {
        self.state
            .lock()
            .entries
            .get(tag)
            .and_then(|cell| cell.get().copied())
    }

    /// Number of resolved tags.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Returns `true` if nothing is resolved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the cache and rejects every later resolution.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.invalidated = true;
        state.entries.clear();
    }

    /// Returns `true` once [`invalidate`](Self::invalidate) ran.
    pub fn is_invalidated(&self) -> bool {
        self.state.lock().invalidated
    }

    /// Number of successful `add_item` calls.
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Number of failed resolutions.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TagHandleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagHandleResolver")
            .field("session_id", &self.session_id)
            .field("resolved", &self.len())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_driver::TestDriver;

    fn resolver(driver: Arc<TestDriver>) -> TagHandleResolver {
        TagHandleResolver::new(
            SessionId(1),
            driver,
            LinkHandle(1),
            SubscriptionHandle {
                id: 1,
                revised_rate: Duration::from_millis(100),
            },
            Arc::new(ClientHandleAllocator::new()),
        )
    }

    #[test]
    fn test_allocator_is_monotonic() {
        let allocator = ClientHandleAllocator::new();
        assert_eq!(allocator.allocate(), ClientHandle(1));
        assert_eq!(allocator.allocate(), ClientHandle(2));
        assert_eq!(allocator.peek(), ClientHandle(3));
    }

    #[tokio::test]
    async fn test_resolve_caches() {
        let driver = Arc::new(TestDriver::new());
        let resolver = resolver(driver.clone());

        let first = resolver.resolve("T1").await.unwrap();
        let second = resolver.resolve("T1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(driver.add_item_calls(), 1);
        assert_eq!(resolver.cached("T1"), Some(first));
    }

    #[tokio::test]
    async fn test_concurrent_resolution_collapses() {
        let driver = Arc::new(TestDriver::new());
        driver.set_add_item_delay(Duration::from_millis(20));
        let resolver = Arc::new(resolver(driver.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("T1").await.unwrap() })
            })
            .collect();

        let mut pairs = Vec::new();
        for handle in handles {
            pairs.push(handle.await.unwrap());
        }

        assert_eq!(driver.add_item_calls(), 1);
        assert!(pairs.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_failure_does_not_poison() {
        let driver = Arc::new(TestDriver::new());
        driver.reject_tag("Missing");
        let resolver = resolver(driver.clone());

        let err = resolver.resolve("Missing").await.unwrap_err();
        assert!(matches!(err, BridgeError::TagResolution { ref tag, .. } if tag == "Missing"));
        assert!(resolver.resolve("T2").await.is_ok());
        assert_eq!(resolver.failure_count(), 1);
        assert_eq!(resolver.len(), 1);

        // A later attempt on the failed tag goes back to the driver.
        driver.accept_tag("Missing");
        assert!(resolver.resolve("Missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_all_preserves_order() {
        let driver = Arc::new(TestDriver::new());
        driver.reject_tag("B");
        let resolver = resolver(driver);

        let results = resolver.resolve_all(&["A", "B", "C"]).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let driver = Arc::new(TestDriver::new());
        let resolver = resolver(driver);

        resolver.resolve("T1").await.unwrap();
        resolver.invalidate();

        assert!(resolver.is_empty());
        assert!(matches!(
            resolver.resolve("T1").await,
            Err(BridgeError::SessionDetached { .. })
        ));
    }
}
