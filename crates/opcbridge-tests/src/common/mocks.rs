// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! A scriptable [`ProtocolDriver`] for exercising the engine in isolation.
//!
//! - Configurable values, qualities and write results per tag
//! - Error injection for handshakes, probes, item registration and reads
//! - Latency injection for handshakes, subscriptions, item registration and reads
//! - Recording of every interaction for verification
//!
//! Every link the mock hands out gets a fresh id; calls on any other link fail with a
//! transport error, like a real server would after the link dropped.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use opcbridge_core::{
    Acquisition, BrowseNode, ClientHandle, ConnectionProfile, DriverError, LinkHandle,
    Notification, Protocol, ProtocolDriver, RawSample, ReadMode, ServerHandle, ServerState,
    SubscriptionHandle, Value,
};

/// Good quality word of the legacy protocol.
pub const DA_GOOD: u32 = 0xC0;
/// Uncertain quality word of the legacy protocol.
pub const DA_UNCERTAIN: u32 = 0x40;
/// Bad (not connected) quality word of the legacy protocol.
pub const DA_BAD: u32 = 0x08;
/// "Item is not writable" result of the legacy protocol.
pub const DA_NOT_WRITABLE: u32 = 0xC004_0006;
/// Good status code of the modern protocol.
pub const UA_GOOD: u32 = 0x0000_0000;
/// Generic bad status code of the modern protocol.
pub const UA_BAD: u32 = 0x8000_0000;

// =============================================================================
// Mock Protocol Driver
// =============================================================================

#[derive(Debug)]
struct MockState {
    live_link: Option<LinkHandle>,
    values: HashMap<String, (Value, u32)>,
    items: HashMap<ServerHandle, (String, ClientHandle)>,
    rejected: HashMap<String, DriverError>,
    write_codes: HashMap<String, u32>,
    read_failure: Option<DriverError>,
    connect_failures: u32,
    probe_script: VecDeque<Result<ServerState, DriverError>>,
    server_state: ServerState,
    connect_latency: Duration,
    subscription_latency: Duration,
    add_item_latency: Duration,
    read_latency: Duration,
    feeds: Vec<mpsc::Sender<Notification>>,
    write_history: Vec<(String, Value)>,
    read_modes: Vec<ReadMode>,
    registrations: Vec<(String, ClientHandle)>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            live_link: None,
            values: HashMap::new(),
            items: HashMap::new(),
            rejected: HashMap::new(),
            write_codes: HashMap::new(),
            read_failure: None,
            connect_failures: 0,
            probe_script: VecDeque::new(),
            server_state: ServerState::Running,
            connect_latency: Duration::ZERO,
            subscription_latency: Duration::ZERO,
            add_item_latency: Duration::ZERO,
            read_latency: Duration::ZERO,
            feeds: Vec::new(),
            write_history: Vec::new(),
            read_modes: Vec::new(),
            registrations: Vec::new(),
        }
    }
}

impl MockState {
    fn check_link(&self, link: LinkHandle) -> Result<(), DriverError> {
        match self.live_link {
            Some(live) if live == link => Ok(()),
            _ => Err(DriverError::transport(format!("link {} is not open", link.0))),
        }
    }
}

/// A highly configurable mock protocol driver for testing.
#[derive(Debug)]
pub struct MockDriver {
    protocol: Protocol,
    acquisition: Acquisition,
    min_rate: Duration,
    state: Mutex<MockState>,
    next_link: AtomicU64,
    next_server: AtomicU32,
    next_subscription: AtomicU32,
    connect_calls: AtomicU64,
    disconnect_calls: AtomicU64,
    probe_calls: AtomicU64,
    add_item_calls: AtomicU64,
    read_calls: AtomicU64,
    write_calls: AtomicU64,
    subscriptions_created: AtomicU64,
    subscriptions_destroyed: AtomicU64,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// A polled legacy-protocol driver with a 1ms minimum rate.
    pub fn new() -> Self {
        Self::with_protocol(Protocol::Da, Acquisition::Poll)
    }

    /// A pushing modern-protocol driver.
    pub fn push() -> Self {
        Self::with_protocol(Protocol::Ua, Acquisition::Push)
    }

    /// A driver for the given protocol and acquisition mode.
    pub fn with_protocol(protocol: Protocol, acquisition: Acquisition) -> Self {
        Self {
            protocol,
            acquisition,
            min_rate: Duration::from_millis(1),
            state: Mutex::new(MockState::default()),
            next_link: AtomicU64::new(1),
            next_server: AtomicU32::new(1000),
            next_subscription: AtomicU32::new(1),
            connect_calls: AtomicU64::new(0),
            disconnect_calls: AtomicU64::new(0),
            probe_calls: AtomicU64::new(0),
            add_item_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
            write_calls: AtomicU64::new(0),
            subscriptions_created: AtomicU64::new(0),
            subscriptions_destroyed: AtomicU64::new(0),
        }
    }

    /// Sets the smallest rate the mock grants.
    pub fn with_min_rate(mut self, rate: Duration) -> Self {
        self.min_rate = rate;
        self
    }

    fn good(&self) -> u32 {
        match self.protocol {
            Protocol::Da => DA_GOOD,
            Protocol::Ua => UA_GOOD,
        }
    }

    fn missing(&self) -> u32 {
        match self.protocol {
            Protocol::Da => DA_BAD,
            Protocol::Ua => UA_BAD,
        }
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Sets a value with good quality.
    pub fn set_value(&self, tag: &str, value: impl Into<Value>) {
        let good = self.good();
        self.state.lock().values.insert(tag.to_string(), (value.into(), good));
    }

    /// Sets a value with a raw quality code.
    pub fn set_value_with_quality(&self, tag: &str, value: impl Into<Value>, quality: u32) {
        self.state
            .lock()
            .values
            .insert(tag.to_string(), (value.into(), quality));
    }

    /// Sets several values with good quality.
    pub fn set_values<V: Into<Value>>(&self, values: impl IntoIterator<Item = (&'static str, V)>) {
        for (tag, value) in values {
            self.set_value(tag, value);
        }
    }

    /// Sets a value and pushes it to every open notification feed.
    pub fn push_value(&self, tag: &str, value: impl Into<Value>) {
        let value = value.into();
        let good = self.good();
        let (clients, feeds) = {
            let mut state = self.state.lock();
            state.values.insert(tag.to_string(), (value.clone(), good));
            let clients: Vec<ClientHandle> = state
                .items
                .values()
                .filter(|(t, _)| t == tag)
                .map(|(_, client)| *client)
                .collect();
            (clients, state.feeds.clone())
        };
        for feed in &feeds {
            for client in &clients {
                let _ = feed.try_send(Notification {
                    client: *client,
                    sample: RawSample::new(value.clone(), good, Utc::now()),
                });
            }
        }
    }

    /// Makes item registration of a tag fail with "not found".
    pub fn reject_tag(&self, tag: &str) {
        self.state.lock().rejected.insert(
            tag.to_string(),
            DriverError::not_found(format!("unknown item '{}'", tag)).with_code(0xC004_0007),
        );
    }

    /// Makes item registration of a tag fail with "access denied".
    pub fn deny_tag(&self, tag: &str) {
        self.state.lock().rejected.insert(
            tag.to_string(),
            DriverError::access_denied(format!("access to '{}' denied", tag)).with_code(0x8007_0005),
        );
    }

    /// Lets item registration of a tag succeed again.
    pub fn accept_tag(&self, tag: &str) {
        self.state.lock().rejected.remove(tag);
    }

    /// Sets the raw result code returned when writing a tag.
    pub fn set_write_code(&self, tag: &str, code: u32) {
        self.state.lock().write_codes.insert(tag.to_string(), code);
    }

    /// Makes every batched read fail with `error` until cleared with `None`.
    pub fn fail_reads(&self, error: Option<DriverError>) {
        self.state.lock().read_failure = error;
    }

    /// Makes the next `count` handshakes fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Makes the next liveness probe fail with `error`.
    pub fn fail_next_probe(&self, error: DriverError) {
        self.state.lock().probe_script.push_back(Err(error));
    }

    /// Sets the state reported by unscripted probes.
    pub fn set_server_state(&self, state: ServerState) {
        self.state.lock().server_state = state;
    }

    /// Delays every handshake. The latency is read when the handshake starts.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.state.lock().connect_latency = latency;
    }

    /// Delays every subscription reply, after the link was checked.
    pub fn set_subscription_latency(&self, latency: Duration) {
        self.state.lock().subscription_latency = latency;
    }

    /// Delays every item registration.
    pub fn set_add_item_latency(&self, latency: Duration) {
        self.state.lock().add_item_latency = latency;
    }

    /// Delays every batched read.
    pub fn set_read_latency(&self, latency: Duration) {
        self.state.lock().read_latency = latency;
    }

    /// Forgets the open link, as if the server went away. Returns `true` if one was open.
    pub fn drop_link(&self) -> bool {
        let mut state = self.state.lock();
        state.feeds.clear();
        state.items.clear();
        let dropped = state.live_link.take();
        tracing::debug!(link = ?dropped, "Mock link dropped");
        dropped.is_some()
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// The link currently open, if any.
    pub fn live_link(&self) -> Option<LinkHandle> {
        self.state.lock().live_link
    }

    /// The current value of a tag.
    pub fn value(&self, tag: &str) -> Option<Value> {
        self.state.lock().values.get(tag).map(|(value, _)| value.clone())
    }

    /// Every successfully written `(tag, value)`, in order.
    pub fn write_history(&self) -> Vec<(String, Value)> {
        self.state.lock().write_history.clone()
    }

    /// Read mode of every batched read, in order.
    pub fn read_modes(&self) -> Vec<ReadMode> {
        self.state.lock().read_modes.clone()
    }

    /// Every successful item registration `(tag, client handle)`, in order.
    pub fn registrations(&self) -> Vec<(String, ClientHandle)> {
        self.state.lock().registrations.clone()
    }

    /// Number of open notification feeds.
    pub fn feed_count(&self) -> usize {
        self.state.lock().feeds.iter().filter(|f| !f.is_closed()).count()
    }

    /// Handshakes attempted.
    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Disconnects received.
    pub fn disconnect_calls(&self) -> u64 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Liveness probes received.
    pub fn probe_calls(&self) -> u64 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Item registrations attempted.
    pub fn add_item_calls(&self) -> u64 {
        self.add_item_calls.load(Ordering::SeqCst)
    }

    /// Batched reads attempted.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Batched writes attempted.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Subscriptions created.
    pub fn subscriptions_created(&self) -> u64 {
        self.subscriptions_created.load(Ordering::SeqCst)
    }

    /// Subscriptions destroyed.
    pub fn subscriptions_destroyed(&self) -> u64 {
        self.subscriptions_destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn acquisition(&self) -> Acquisition {
        self.acquisition
    }

    async fn connect(&self, _profile: &ConnectionProfile) -> Result<LinkHandle, DriverError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().connect_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DriverError::transport("connection refused").with_code(0x8007_06BA));
        }
        let link = LinkHandle(self.next_link.fetch_add(1, Ordering::SeqCst));
        state.live_link = Some(link);
        state.items.clear();
        state.feeds.clear();
        Ok(link)
    }

    async fn disconnect(&self, link: LinkHandle) -> Result<(), DriverError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.live_link == Some(link) {
            state.live_link = None;
            state.items.clear();
            state.feeds.clear();
        }
        Ok(())
    }

    async fn server_status(&self, link: LinkHandle) -> Result<ServerState, DriverError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.check_link(link)?;
        match state.probe_script.pop_front() {
            Some(scripted) => scripted,
            None => Ok(state.server_state),
        }
    }

    async fn create_subscription(
        &self,
        link: LinkHandle,
        requested_rate: Duration,
    ) -> Result<SubscriptionHandle, DriverError> {
        let latency = {
            let state = self.state.lock();
            state.check_link(link)?;
            state.subscription_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.subscriptions_created.fetch_add(1, Ordering::SeqCst);
        Ok(SubscriptionHandle {
            id: self.next_subscription.fetch_add(1, Ordering::SeqCst),
            revised_rate: requested_rate.max(self.min_rate),
        })
    }

    async fn destroy_subscription(
        &self,
        _link: LinkHandle,
        _subscription: SubscriptionHandle,
    ) -> Result<(), DriverError> {
        self.subscriptions_destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_item(
        &self,
        link: LinkHandle,
        _subscription: SubscriptionHandle,
        tag: &str,
        client: ClientHandle,
    ) -> Result<ServerHandle, DriverError> {
        self.add_item_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().add_item_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.check_link(link)?;
        if let Some(error) = state.rejected.get(tag) {
            return Err(error.clone());
        }
        let server = ServerHandle(self.next_server.fetch_add(1, Ordering::SeqCst));
        state.items.insert(server, (tag.to_string(), client));
        state.registrations.push((tag.to_string(), client));
        Ok(server)
    }

    async fn read_batch(
        &self,
        link: LinkHandle,
        _subscription: SubscriptionHandle,
        items: &[ServerHandle],
        mode: ReadMode,
    ) -> Result<Vec<RawSample>, DriverError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().read_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.check_link(link)?;
        if let Some(error) = state.read_failure.clone() {
            return Err(error);
        }
        state.read_modes.push(mode);

        let missing = self.missing();
        let now = Utc::now();
        Ok(items
            .iter()
            .map(|handle| {
                let reading = state
                    .items
                    .get(handle)
                    .and_then(|(tag, _)| state.values.get(tag));
                match reading {
                    Some((value, quality)) => RawSample::new(value.clone(), *quality, now),
                    None => RawSample::new(Value::Null, missing, now),
                }
            })
            .collect())
    }

    async fn write_batch(
        &self,
        link: LinkHandle,
        _subscription: SubscriptionHandle,
        items: &[(ServerHandle, Value)],
    ) -> Result<Vec<u32>, DriverError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let good = self.good();
        let mut state = self.state.lock();
        state.check_link(link)?;

        let mut codes = Vec::with_capacity(items.len());
        for (handle, value) in items {
            let Some((tag, _)) = state.items.get(handle).cloned() else {
                codes.push(0xC004_0001);
                continue;
            };
            let code = state.write_codes.get(&tag).copied().unwrap_or(0);
            if code & 0x8000_0000 == 0 {
                state.values.insert(tag.clone(), (value.clone(), good));
                state.write_history.push((tag, value.clone()));
            }
            codes.push(code);
        }
        Ok(codes)
    }

    async fn notifications(
        &self,
        link: LinkHandle,
        _subscription: SubscriptionHandle,
    ) -> Result<mpsc::Receiver<Notification>, DriverError> {
        let mut state = self.state.lock();
        state.check_link(link)?;
        let (tx, rx) = mpsc::channel(64);
        state.feeds.push(tx);
        Ok(rx)
    }

    async fn browse(&self, link: LinkHandle, root: &str) -> Result<Vec<BrowseNode>, DriverError> {
        let state = self.state.lock();
        state.check_link(link)?;

        let prefix = if root.is_empty() {
            String::new()
        } else {
            format!("{}.", root)
        };
        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        for tag in state.values.keys() {
            let Some(rest) = tag.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('.') {
                Some((head, _)) => {
                    children.insert(format!("{}{}", prefix, head), true);
                }
                None => {
                    children.entry(tag.clone()).or_insert(false);
                }
            }
        }

        Ok(children
            .into_iter()
            .map(|(id, branch)| {
                let name = id.rsplit('.').next().unwrap_or(&id).to_string();
                if branch {
                    BrowseNode::branch(id, name)
                } else {
                    BrowseNode::leaf(id, name)
                }
            })
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::builder(Protocol::Da)
            .host("localhost")
            .port(135)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_links_are_not_reused() {
        let driver = MockDriver::new();
        let first = driver.connect(&profile()).await.unwrap();
        driver.disconnect(first).await.unwrap();
        let second = driver.connect(&profile()).await.unwrap();

        assert_ne!(first, second);
        assert!(driver.server_status(first).await.is_err());
        assert!(driver.server_status(second).await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let driver = MockDriver::new();
        driver.fail_next_connects(1);
        assert!(driver.connect(&profile()).await.is_err());
        let link = driver.connect(&profile()).await.unwrap();

        driver.fail_next_probe(DriverError::timeout("probe timed out"));
        assert!(driver.server_status(link).await.is_err());
        assert_eq!(driver.server_status(link).await.unwrap(), ServerState::Running);
        assert_eq!(driver.connect_calls(), 2);
        assert_eq!(driver.probe_calls(), 2);
    }

    #[tokio::test]
    async fn test_browse_hierarchy() {
        let driver = MockDriver::new();
        driver.set_values([("Line1.Speed", 1), ("Line1.Count", 2), ("Plant", 3)]);
        let link = driver.connect(&profile()).await.unwrap();

        let root = driver.browse(link, "").await.unwrap();
        assert_eq!(root.len(), 2);
        assert!(root[0].has_children);
        assert_eq!(root[1].id, "Plant");

        let line = driver.browse(link, "Line1").await.unwrap();
        assert_eq!(line.len(), 2);
        assert!(line.iter().all(|n| !n.has_children));
    }
}
