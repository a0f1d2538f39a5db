// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulated server driver.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SimulatedDriver                         │
//! │                   (ProtocolDriver impl)                      │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ Arc<Shared>
//!          ┌─────────────────────┴─────────────────────┐
//!          ▼                                           ▼
//!   Server (Mutex)                               update task
//!   tags, links, subscriptions, feeds            advances tags every update period,
//!                                                pushes changes to open feeds
//! ```
//!
//! The update task runs while at least one link is open. Status codes follow the protocol
//! the driver was built for, so the engine's quality decoding sees realistic values.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use opcbridge_core::{
    Acquisition, BrowseNode, ClientHandle, ConnectionProfile, Credentials, DriverError, LinkHandle,
    Notification, Protocol, ProtocolDriver, RawSample, ReadMode, ServerHandle, ServerState,
    SubscriptionHandle, Value,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::tag::{default_catalogue, SimTag};

/// Default smallest revised rate.
pub const DEFAULT_MIN_RATE: Duration = Duration::from_millis(50);

/// Default period of the value generator.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_millis(500);

const FEED_CAPACITY: usize = 256;

// =============================================================================
// Status codes
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Codes {
    good: u32,
    bad_item: u32,
    write_ok: u32,
    invalid_handle: u32,
    unknown_item: u32,
    not_writable: u32,
}

impl Codes {
    fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Da => Self {
                good: 0xC0,
                bad_item: 0x04,
                write_ok: 0,
                invalid_handle: 0xC004_0001,
                unknown_item: 0xC004_0007,
                not_writable: 0xC004_0006,
            },
            Protocol::Ua => Self {
                good: 0,
                bad_item: 0x8034_0000,
                write_ok: 0,
                invalid_handle: 0x8034_0000,
                unknown_item: 0x8034_0000,
                not_writable: 0x803B_0000,
            },
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SimulatedDriver`].
#[derive(Debug, Clone)]
pub struct SimulatedDriverBuilder {
    protocol: Protocol,
    acquisition: Acquisition,
    min_rate: Duration,
    update_period: Duration,
    seed: Option<u64>,
    tags: Vec<SimTag>,
    login: Option<(String, String)>,
}

impl SimulatedDriverBuilder {
    fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            acquisition: Acquisition::Poll,
            min_rate: DEFAULT_MIN_RATE,
            update_period: DEFAULT_UPDATE_PERIOD,
            seed: None,
            tags: Vec::new(),
            login: None,
        }
    }

    /// Sets poll or push acquisition.
    pub fn acquisition(mut self, acquisition: Acquisition) -> Self {
        self.acquisition = acquisition;
        self
    }

    /// Sets the smallest rate the server grants.
    pub fn min_rate(mut self, rate: Duration) -> Self {
        self.min_rate = rate;
        self
    }

    /// Sets how often tag values evolve.
    pub fn update_period(mut self, period: Duration) -> Self {
        self.update_period = period;
        self
    }

    /// Seeds the value generator.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Adds a tag to the address space.
    pub fn tag(mut self, tag: SimTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Adds several tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = SimTag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Requires user/password credentials on connect.
    pub fn require_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some((username.into(), password.into()));
        self
    }

    /// Builds the driver. An empty tag list falls back to the default catalogue.
    pub fn build(self) -> SimulatedDriver {
        let tags = if self.tags.is_empty() {
            default_catalogue()
        } else {
            self.tags
        };
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let name = format!("simulated-{}", self.protocol);

        SimulatedDriver {
            shared: Arc::new(Shared {
                name,
                protocol: self.protocol,
                acquisition: self.acquisition,
                min_rate: self.min_rate,
                update_period: self.update_period.max(Duration::from_millis(1)),
                login: self.login,
                codes: Codes::for_protocol(self.protocol),
                server: Mutex::new(Server {
                    state: ServerState::Running,
                    tags: tags.into_iter().map(|t| (t.name.clone(), t)).collect(),
                    rng,
                    links: HashMap::new(),
                    subscriptions: HashMap::new(),
                    updates: None,
                }),
                fail_next_probe: AtomicBool::new(false),
                refuse_connections: AtomicBool::new(false),
                next_link: AtomicU64::new(1),
                next_subscription: AtomicU32::new(1),
                next_item: AtomicU32::new(1),
                connects: AtomicU64::new(0),
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }
}

// =============================================================================
// Server state
// =============================================================================

struct Item {
    tag: String,
    client: ClientHandle,
}

struct Subscription {
    link: u64,
    items: HashMap<ServerHandle, Item>,
    feed: Option<mpsc::Sender<Notification>>,
}

struct Server {
    state: ServerState,
    tags: BTreeMap<String, SimTag>,
    rng: StdRng,
    links: HashMap<u64, String>,
    subscriptions: HashMap<u32, Subscription>,
    updates: Option<CancellationToken>,
}

impl Server {
    fn check_link(&self, link: LinkHandle) -> Result<(), DriverError> {
        if self.links.contains_key(&link.0) {
            Ok(())
        } else {
            Err(DriverError::transport(format!("link {} is not open", link.0)))
        }
    }

    fn subscription(
        &mut self,
        link: LinkHandle,
        handle: SubscriptionHandle,
    ) -> Result<&mut Subscription, DriverError> {
        self.check_link(link)?;
        match self.subscriptions.get_mut(&handle.id) {
            Some(sub) if sub.link == link.0 => Ok(sub),
            _ => Err(DriverError::not_found(format!("subscription {} does not exist", handle.id))),
        }
    }

    /// Sends `changes` to every open feed. Closed feeds are dropped.
    fn publish(&mut self, changes: &[(String, Value)], good: u32) {
        if changes.is_empty() {
            return;
        }
        let timestamp = Utc::now();
        for sub in self.subscriptions.values_mut() {
            let Some(feed) = &sub.feed else { continue };
            let mut closed = false;
            for item in sub.items.values() {
                let Some((_, value)) = changes.iter().find(|(tag, _)| *tag == item.tag) else {
                    continue;
                };
                let notification = Notification {
                    client: item.client,
                    sample: RawSample::new(value.clone(), good, timestamp),
                };
                match feed.try_send(notification) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => trace!(tag = %item.tag, "Feed full, change dropped"),
                    Err(TrySendError::Closed(_)) => {
                        closed = true;
                        break;
                    }
                }
            }
            if closed {
                sub.feed = None;
            }
        }
    }

    fn close_link(&mut self, link: u64) -> bool {
        let existed = self.links.remove(&link).is_some();
        self.subscriptions.retain(|_, sub| sub.link != link);
        if self.links.is_empty() {
            if let Some(token) = self.updates.take() {
                token.cancel();
            }
        }
        existed
    }
}

struct Shared {
    name: String,
    protocol: Protocol,
    acquisition: Acquisition,
    min_rate: Duration,
    update_period: Duration,
    login: Option<(String, String)>,
    codes: Codes,
    server: Mutex<Server>,
    fail_next_probe: AtomicBool,
    refuse_connections: AtomicBool,
    next_link: AtomicU64,
    next_subscription: AtomicU32,
    next_item: AtomicU32,
    connects: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Shared {
    fn update(&self) {
        let mut server = self.server.lock();
        let Server { tags, rng, .. } = &mut *server;
        let changes: Vec<(String, Value)> = tags
            .values_mut()
            .filter_map(|tag| tag.advance(rng).then(|| (tag.name.clone(), tag.value.clone())))
            .collect();
        server.publish(&changes, self.codes.good);
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<(), DriverError> {
        let Some((username, password)) = &self.login else {
            return Ok(());
        };
        match credentials {
            Credentials::UserPassword {
                username: u,
                password: p,
                ..
            } if u == username && p == password => Ok(()),
            _ => Err(DriverError::access_denied("invalid user name or password")),
        }
    }
}

async fn run_updates(shared: Arc<Shared>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.update_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => shared.update(),
        }
    }
    debug!(driver = %shared.name, "Update task stopped");
}

// =============================================================================
// SimulatedDriver
// =============================================================================

/// An in-memory server implementing [`ProtocolDriver`].
///
/// ```rust,ignore
/// use opcbridge_sim::{SimTag, SimulatedDriver};
///
/// let driver = SimulatedDriver::builder(Protocol::Ua)
///     .acquisition(Acquisition::Push)
///     .tag(SimTag::random_walk("Boiler.Pressure", 4.2, 0.1))
///     .build();
/// let connection = OpcConnection::new(Arc::new(driver));
/// ```
pub struct SimulatedDriver {
    shared: Arc<Shared>,
}

impl SimulatedDriver {
    /// Creates a builder.
    pub fn builder(protocol: Protocol) -> SimulatedDriverBuilder {
        SimulatedDriverBuilder::new(protocol)
    }

    /// A poll-mode server with the default catalogue.
    pub fn new(protocol: Protocol) -> Self {
        Self::builder(protocol).build()
    }

    // ---- Fault injection ----

    /// Makes the next status query fail with a timeout.
    pub fn fail_next_probe(&self) {
        self.shared.fail_next_probe.store(true, Ordering::SeqCst);
    }

    /// Closes every open link as if the network went away. Returns the number of links dropped.
    pub fn drop_links(&self) -> usize {
        let mut server = self.shared.server.lock();
        let links: Vec<u64> = server.links.keys().copied().collect();
        for link in &links {
            server.close_link(*link);
        }
        if !links.is_empty() {
            info!(driver = %self.shared.name, links = links.len(), "Links dropped");
        }
        links.len()
    }

    /// Refuses (or accepts again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Sets the state reported by status queries.
    pub fn set_server_state(&self, state: ServerState) {
        self.shared.server.lock().state = state;
    }

    // ---- Address space ----

    /// Overwrites a tag value and notifies monitored items. Returns `false` for unknown tags.
    pub fn set_value(&self, tag: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        let mut server = self.shared.server.lock();
        let Some(entry) = server.tags.get_mut(tag) else {
            return false;
        };
        if entry.value != value {
            entry.value = value.clone();
            server.publish(&[(tag.to_string(), value)], self.shared.codes.good);
        }
        true
    }

    /// Current value of a tag.
    pub fn value(&self, tag: &str) -> Option<Value> {
        self.shared.server.lock().tags.get(tag).map(|t| t.value.clone())
    }

    /// Names of all tags, sorted.
    pub fn tag_names(&self) -> Vec<String> {
        self.shared.server.lock().tags.keys().cloned().collect()
    }

    /// Advances every tag once, outside the update schedule.
    pub fn tick(&self) {
        self.shared.update();
    }

    // ---- Introspection ----

    /// Number of open links.
    pub fn link_count(&self) -> usize {
        self.shared.server.lock().links.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.server.lock().subscriptions.len()
    }

    /// Number of successful handshakes.
    pub fn connects(&self) -> u64 {
        self.shared.connects.load(Ordering::Relaxed)
    }

    /// Number of batched reads served.
    pub fn reads(&self) -> u64 {
        self.shared.reads.load(Ordering::Relaxed)
    }

    /// Number of batched writes served.
    pub fn writes(&self) -> u64 {
        self.shared.writes.load(Ordering::Relaxed)
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        if let Some(token) = self.shared.server.lock().updates.take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for SimulatedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDriver")
            .field("name", &self.shared.name)
            .field("acquisition", &self.shared.acquisition)
            .field("links", &self.link_count())
            .finish()
    }
}

#[async_trait]
impl ProtocolDriver for SimulatedDriver {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn protocol(&self) -> Protocol {
        self.shared.protocol
    }

    fn acquisition(&self) -> Acquisition {
        self.shared.acquisition
    }

    async fn connect(&self, profile: &ConnectionProfile) -> Result<LinkHandle, DriverError> {
        if self.shared.refuse_connections.load(Ordering::SeqCst) {
            return Err(DriverError::transport(format!(
                "connection to {} refused",
                profile.describe()
            )));
        }
        if profile.protocol != self.shared.protocol {
            return Err(DriverError::rejected(format!(
                "server speaks {}, profile asks for {}",
                self.shared.protocol, profile.protocol
            )));
        }
        self.shared.authenticate(&profile.credentials)?;

        let link = self.shared.next_link.fetch_add(1, Ordering::Relaxed);
        {
            let mut server = self.shared.server.lock();
            server.links.insert(link, profile.describe());
            if server.updates.is_none() {
                let token = CancellationToken::new();
                tokio::spawn(run_updates(self.shared.clone(), token.clone()));
                server.updates = Some(token);
            }
        }
        self.shared.connects.fetch_add(1, Ordering::Relaxed);
        debug!(driver = %self.shared.name, link, endpoint = %profile.describe(), "Link opened");
        Ok(LinkHandle(link))
    }

    async fn disconnect(&self, link: LinkHandle) -> Result<(), DriverError> {
        if self.shared.server.lock().close_link(link.0) {
            debug!(driver = %self.shared.name, link = link.0, "Link closed");
        }
        Ok(())
    }

    async fn server_status(&self, link: LinkHandle) -> Result<ServerState, DriverError> {
        let server = self.shared.server.lock();
        server.check_link(link)?;
        if self.shared.fail_next_probe.swap(false, Ordering::SeqCst) {
            return Err(DriverError::timeout("status query timed out"));
        }
        Ok(server.state)
    }

    async fn create_subscription(
        &self,
        link: LinkHandle,
        requested_rate: Duration,
    ) -> Result<SubscriptionHandle, DriverError> {
        let mut server = self.shared.server.lock();
        server.check_link(link)?;
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        server.subscriptions.insert(
            id,
            Subscription {
                link: link.0,
                items: HashMap::new(),
                feed: None,
            },
        );
        Ok(SubscriptionHandle {
            id,
            revised_rate: requested_rate.max(self.shared.min_rate),
        })
    }

    async fn destroy_subscription(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
    ) -> Result<(), DriverError> {
        let mut server = self.shared.server.lock();
        server.subscription(link, subscription)?;
        server.subscriptions.remove(&subscription.id);
        Ok(())
    }

    async fn add_item(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        tag: &str,
        client: ClientHandle,
    ) -> Result<ServerHandle, DriverError> {
        let mut server = self.shared.server.lock();
        if !server.tags.contains_key(tag) {
            server.check_link(link)?;
            return Err(DriverError::not_found(format!("unknown item '{}'", tag))
                .with_code(self.shared.codes.unknown_item));
        }
        let handle = ServerHandle(self.shared.next_item.fetch_add(1, Ordering::Relaxed));
        server.subscription(link, subscription)?.items.insert(
            handle,
            Item {
                tag: tag.to_string(),
                client,
            },
        );
        Ok(handle)
    }

    async fn read_batch(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        items: &[ServerHandle],
        _mode: ReadMode,
    ) -> Result<Vec<RawSample>, DriverError> {
        let codes = self.shared.codes;
        let mut server = self.shared.server.lock();
        let tags: Vec<Option<String>> = {
            let sub = server.subscription(link, subscription)?;
            items
                .iter()
                .map(|handle| sub.items.get(handle).map(|item| item.tag.clone()))
                .collect()
        };
        self.shared.reads.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        Ok(tags
            .into_iter()
            .map(|tag| match tag.and_then(|t| server.tags.get(&t)) {
                Some(entry) => RawSample::new(entry.value.clone(), codes.good, now),
                None => RawSample::new(Value::Null, codes.bad_item, now),
            })
            .collect())
    }

    async fn write_batch(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        items: &[(ServerHandle, Value)],
    ) -> Result<Vec<u32>, DriverError> {
        let codes = self.shared.codes;
        let mut server = self.shared.server.lock();
        let tags: Vec<Option<String>> = {
            let sub = server.subscription(link, subscription)?;
            items
                .iter()
                .map(|(handle, _)| sub.items.get(handle).map(|item| item.tag.clone()))
                .collect()
        };
        self.shared.writes.fetch_add(1, Ordering::Relaxed);

        let mut changes = Vec::new();
        let results: Vec<u32> = items
            .iter()
            .zip(tags)
            .map(|((_, value), tag)| {
                let Some(tag) = tag else {
                    return codes.invalid_handle;
                };
                match server.tags.get_mut(&tag) {
                    None => codes.unknown_item,
                    Some(entry) if !entry.writable => codes.not_writable,
                    Some(entry) => {
                        if entry.value != *value {
                            entry.value = value.clone();
                            changes.push((tag, value.clone()));
                        }
                        codes.write_ok
                    }
                }
            })
            .collect();
        server.publish(&changes, codes.good);
        Ok(results)
    }

    async fn notifications(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
    ) -> Result<mpsc::Receiver<Notification>, DriverError> {
        if self.shared.acquisition != Acquisition::Push {
            return Err(DriverError::unsupported(format!(
                "{} does not push notifications",
                self.shared.name
            )));
        }
        let mut server = self.shared.server.lock();
        let sub = server.subscription(link, subscription)?;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        sub.feed = Some(tx);
        Ok(rx)
    }

    async fn browse(&self, link: LinkHandle, root: &str) -> Result<Vec<BrowseNode>, DriverError> {
        let server = self.shared.server.lock();
        server.check_link(link)?;

        let root = root.trim_matches('.');
        let prefix = if root.is_empty() {
            String::new()
        } else {
            format!("{}.", root)
        };

        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        for name in server.tags.keys() {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('.') {
                Some((head, _)) => {
                    children.insert(format!("{}{}", prefix, head), true);
                }
                None if !rest.is_empty() => {
                    children.entry(name.clone()).or_insert(false);
                }
                None => {}
            }
        }

        if children.is_empty() && !root.is_empty() && !server.tags.contains_key(root) {
            return Err(DriverError::not_found(format!("unknown node '{}'", root)));
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

    fn profile(protocol: Protocol) -> ConnectionProfile {
        ConnectionProfile::builder(protocol)
            .host("sim")
            .port(4840)
            .build()
            .unwrap()
    }

    fn driver() -> SimulatedDriver {
        SimulatedDriver::builder(Protocol::Ua)
            .seed(3)
            .tag(SimTag::counter("Line1.Count", 0, 1))
            .tag(SimTag::fixed("Line1.Recipe", "A"))
            .tag(SimTag::fixed("Plant.Name", "North").read_only())
            .build()
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let driver = driver();
        let link = driver.connect(&profile(Protocol::Ua)).await.unwrap();
        let sub = driver
            .create_subscription(link, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(sub.revised_rate, DEFAULT_MIN_RATE);

        let recipe = driver
            .add_item(link, sub, "Line1.Recipe", ClientHandle(1))
            .await
            .unwrap();
        let plant = driver
            .add_item(link, sub, "Plant.Name", ClientHandle(2))
            .await
            .unwrap();

        let results = driver
            .write_batch(
                link,
                sub,
                &[
                    (recipe, Value::from("B")),
                    (plant, Value::from("South")),
                    (ServerHandle(9999), Value::from("x")),
                ],
            )
            .await
            .unwrap();
        assert_eq!(results, vec![0, 0x803B_0000, 0x8034_0000]);

        let samples = driver
            .read_batch(link, sub, &[plant, recipe], ReadMode::Cache)
            .await
            .unwrap();
        assert_eq!(samples[0].value, Value::from("North"));
        assert_eq!(samples[1].value, Value::from("B"));
        assert_eq!(samples[1].quality, 0);
    }

    #[tokio::test]
    async fn test_unknown_item_rejected() {
        let driver = SimulatedDriver::builder(Protocol::Da).build();
        let link = driver.connect(&profile(Protocol::Da)).await.unwrap();
        let sub = driver
            .create_subscription(link, Duration::from_secs(1))
            .await
            .unwrap();
        let error = driver
            .add_item(link, sub, "Nope", ClientHandle(1))
            .await
            .unwrap_err();
        assert_eq!(error.code, Some(0xC004_0007));
        assert!(!error.is_connection_level());
    }

    #[tokio::test]
    async fn test_protocol_mismatch_and_login() {
        let driver = SimulatedDriver::builder(Protocol::Ua)
            .require_login("operator", "secret")
            .build();
        assert!(driver.connect(&profile(Protocol::Da)).await.is_err());
        assert!(driver.connect(&profile(Protocol::Ua)).await.is_err());

        let with_login = ConnectionProfile::builder(Protocol::Ua)
            .host("sim")
            .port(4840)
            .credentials(Credentials::UserPassword {
                domain: None,
                username: "operator".into(),
                password: "secret".into(),
            })
            .build()
            .unwrap();
        driver.connect(&with_login).await.unwrap();
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let driver = driver();
        let link = driver.connect(&profile(Protocol::Ua)).await.unwrap();

        driver.fail_next_probe();
        assert!(driver.server_status(link).await.is_err());
        assert_eq!(driver.server_status(link).await.unwrap(), ServerState::Running);

        driver.set_server_state(ServerState::Suspended);
        assert_eq!(driver.server_status(link).await.unwrap(), ServerState::Suspended);

        assert_eq!(driver.drop_links(), 1);
        let error = driver.server_status(link).await.unwrap_err();
        assert!(error.is_connection_level());

        driver.refuse_connections(true);
        assert!(driver.connect(&profile(Protocol::Ua)).await.is_err());
    }

    #[tokio::test]
    async fn test_push_feed() {
        let driver = SimulatedDriver::builder(Protocol::Ua)
            .acquisition(Acquisition::Push)
            .update_period(Duration::from_secs(3600))
            .tag(SimTag::fixed("Line1.Recipe", "A"))
            .build();
        let link = driver.connect(&profile(Protocol::Ua)).await.unwrap();
        let sub = driver
            .create_subscription(link, Duration::from_millis(100))
            .await
            .unwrap();
        driver
            .add_item(link, sub, "Line1.Recipe", ClientHandle(7))
            .await
            .unwrap();
        let mut feed = driver.notifications(link, sub).await.unwrap();

        assert!(driver.set_value("Line1.Recipe", "B"));
        let notification = feed.recv().await.unwrap();
        assert_eq!(notification.client, ClientHandle(7));
        assert_eq!(notification.sample.value, Value::from("B"));

        // Same value again is not a change.
        driver.set_value("Line1.Recipe", "B");
        assert!(feed.try_recv().is_err());

        driver.disconnect(link).await.unwrap();
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_poll_driver_has_no_feed() {
        let driver = driver();
        let link = driver.connect(&profile(Protocol::Ua)).await.unwrap();
        let sub = driver
            .create_subscription(link, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(driver.notifications(link, sub).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_evolve_while_connected() {
        let driver = SimulatedDriver::builder(Protocol::Ua)
            .update_period(Duration::from_millis(100))
            .tag(SimTag::counter("Line1.Count", 0, 1))
            .build();
        let link = driver.connect(&profile(Protocol::Ua)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(driver.value("Line1.Count"), Some(Value::Int64(3)));

        driver.disconnect(link).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(driver.value("Line1.Count"), Some(Value::Int64(3)));
    }

    #[tokio::test]
    async fn test_browse() {
        let driver = driver();
        let link = driver.connect(&profile(Protocol::Ua)).await.unwrap();

        let top = driver.browse(link, "").await.unwrap();
        assert_eq!(
            top,
            vec![BrowseNode::branch("Line1", "Line1"), BrowseNode::branch("Plant", "Plant")]
        );

        let line = driver.browse(link, "Line1").await.unwrap();
        assert_eq!(
            line,
            vec![
                BrowseNode::leaf("Line1.Count", "Count"),
                BrowseNode::leaf("Line1.Recipe", "Recipe"),
            ]
        );

        assert!(driver.browse(link, "Line1.Count").await.unwrap().is_empty());
        assert!(driver.browse(link, "Line9").await.is_err());
    }
}
