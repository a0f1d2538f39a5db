// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-crate scripted driver for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::driver::{
    Acquisition, LinkHandle, Notification, ProtocolDriver, RawSample, SubscriptionHandle,
};
use crate::error::DriverError;
use crate::profile::{ConnectionProfile, ReadMode};
use crate::types::{BrowseNode, ClientHandle, Protocol, ServerHandle, ServerState, Value};

const GOOD: u32 = 0xC0;

pub(crate) struct TestDriver {
    acquisition: Acquisition,
    min_rate: Duration,
    add_item_delay: Mutex<Duration>,
    rejected: Mutex<HashSet<String>>,
    values: Mutex<HashMap<String, (Value, u32)>>,
    items: Mutex<HashMap<ServerHandle, (String, ClientHandle)>>,
    write_results: Mutex<HashMap<String, u32>>,
    read_error: Mutex<Option<DriverError>>,
    status: Mutex<Result<ServerState, DriverError>>,
    feeds: Mutex<Vec<mpsc::Sender<Notification>>>,
    fail_connect: AtomicBool,
    next_server: AtomicU32,
    add_item_calls: AtomicU64,
    read_calls: AtomicU64,
    destroy_calls: AtomicU64,
    disconnect_calls: AtomicU64,
}

impl TestDriver {
    pub(crate) fn new() -> Self {
        Self::with_acquisition(Acquisition::Poll)
    }

    pub(crate) fn with_acquisition(acquisition: Acquisition) -> Self {
        Self {
            acquisition,
            min_rate: Duration::from_millis(1),
            add_item_delay: Mutex::new(Duration::ZERO),
            rejected: Mutex::new(HashSet::new()),
            values: Mutex::new(HashMap::new()),
            items: Mutex::new(HashMap::new()),
            write_results: Mutex::new(HashMap::new()),
            read_error: Mutex::new(None),
            status: Mutex::new(Ok(ServerState::Running)),
            feeds: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            next_server: AtomicU32::new(1000),
            add_item_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
            destroy_calls: AtomicU64::new(0),
            disconnect_calls: AtomicU64::new(0),
        }
    }

    pub(crate) fn with_min_rate(mut self, rate: Duration) -> Self {
        self.min_rate = rate;
        self
    }

    pub(crate) fn set_add_item_delay(&self, delay: Duration) {
        *self.add_item_delay.lock() = delay;
    }

    pub(crate) fn reject_tag(&self, tag: &str) {
        self.rejected.lock().insert(tag.to_string());
    }

    pub(crate) fn accept_tag(&self, tag: &str) {
        self.rejected.lock().remove(tag);
    }

    pub(crate) fn set_value(&self, tag: &str, value: impl Into<Value>) {
        self.values.lock().insert(tag.to_string(), (value.into(), GOOD));
    }

    pub(crate) fn set_value_with_quality(&self, tag: &str, value: impl Into<Value>, quality: u32) {
        self.values.lock().insert(tag.to_string(), (value.into(), quality));
    }

    pub(crate) fn set_write_result(&self, tag: &str, code: u32) {
        self.write_results.lock().insert(tag.to_string(), code);
    }

    pub(crate) fn fail_reads(&self, error: Option<DriverError>) {
        *self.read_error.lock() = error;
    }

    pub(crate) fn set_status(&self, status: Result<ServerState, DriverError>) {
        *self.status.lock() = status;
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Pushes a change to every open feed for items registered under `tag`.
    pub(crate) fn push(&self, tag: &str, value: impl Into<Value>) {
        let value = value.into();
        self.values.lock().insert(tag.to_string(), (value.clone(), GOOD));
        let clients: Vec<ClientHandle> = self
            .items
            .lock()
            .values()
            .filter(|(t, _)| t == tag)
            .map(|(_, c)| *c)
            .collect();
        let feeds = self.feeds.lock().clone();
        for feed in feeds {
            for client in &clients {
                let _ = feed.try_send(Notification {
                    client: *client,
                    sample: RawSample::new(value.clone(), GOOD, Utc::now()),
                });
            }
        }
    }

    pub(crate) fn add_item_calls(&self) -> u64 {
        self.add_item_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn destroy_calls(&self) -> u64 {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_calls(&self) -> u64 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolDriver for TestDriver {
    fn name(&self) -> &str {
        "test"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Da
    }

    fn acquisition(&self) -> Acquisition {
        self.acquisition
    }

    async fn connect(&self, _profile: &ConnectionProfile) -> Result<LinkHandle, DriverError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(DriverError::transport("connection refused"));
        }
        Ok(LinkHandle(1))
    }

    async fn disconnect(&self, _link: LinkHandle) -> Result<(), DriverError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.feeds.lock().clear();
        Ok(())
    }

    async fn server_status(&self, _link: LinkHandle) -> Result<ServerState, DriverError> {
        self.status.lock().clone()
    }

    async fn create_subscription(
        &self,
        _link: LinkHandle,
        requested_rate: Duration,
    ) -> Result<SubscriptionHandle, DriverError> {
        Ok(SubscriptionHandle {
            id: 1,
            revised_rate: requested_rate.max(self.min_rate),
        })
    }

    async fn destroy_subscription(
        &self,
        _link: LinkHandle,
        _subscription: SubscriptionHandle,
    ) -> Result<(), DriverError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_item(
        &self,
        _link: LinkHandle,
        _subscription: SubscriptionHandle,
        tag: &str,
        client: ClientHandle,
    ) -> Result<ServerHandle, DriverError> {
        self.add_item_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.add_item_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.rejected.lock().contains(tag) {
            return Err(DriverError::not_found(format!("unknown item '{}'", tag)));
        }
        let server = ServerHandle(self.next_server.fetch_add(1, Ordering::SeqCst));
        self.items.lock().insert(server, (tag.to_string(), client));
        Ok(server)
    }

    async fn read_batch(
        &self,
        _link: LinkHandle,
        _subscription: SubscriptionHandle,
        items: &[ServerHandle],
        _mode: ReadMode,
    ) -> Result<Vec<RawSample>, DriverError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.read_error.lock().clone() {
            return Err(error);
        }
        let registered = self.items.lock();
        let values = self.values.lock();
        Ok(items
            .iter()
            .map(|handle| {
                let tag = registered.get(handle).map(|(t, _)| t.as_str()).unwrap_or("");
                match values.get(tag) {
                    Some((value, quality)) => RawSample::new(value.clone(), *quality, Utc::now()),
                    None => RawSample::new(Value::Null, 0x08, Utc::now()),
                }
            })
            .collect())
    }

    async fn write_batch(
        &self,
        _link: LinkHandle,
        _subscription: SubscriptionHandle,
        items: &[(ServerHandle, Value)],
    ) -> Result<Vec<u32>, DriverError> {
        let registered = self.items.lock();
        let results = self.write_results.lock();
        let mut values = self.values.lock();
        Ok(items
            .iter()
            .map(|(handle, value)| {
                let tag = registered.get(handle).map(|(t, _)| t.clone()).unwrap_or_default();
                let code = results.get(&tag).copied().unwrap_or(0);
                if code & 0x8000_0000 == 0 {
                    values.insert(tag, (value.clone(), GOOD));
                }
                code
            })
            .collect())
    }

    async fn notifications(
        &self,
        _link: LinkHandle,
        _subscription: SubscriptionHandle,
    ) -> Result<mpsc::Receiver<Notification>, DriverError> {
        let (tx, rx) = mpsc::channel(64);
        self.feeds.lock().push(tx);
        Ok(rx)
    }

    async fn browse(&self, _link: LinkHandle, root: &str) -> Result<Vec<BrowseNode>, DriverError> {
        Ok(vec![
            BrowseNode::branch(format!("{}.Folder", root), "Folder"),
            BrowseNode::leaf(format!("{}.T1", root), "T1"),
        ])
    }
}
