//! Mock implementations for the collaborator traits
//!
//! In-memory test doubles so the worker and dispatcher can be exercised
//! without a broker, a database or a real scraper.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use harvester_core::{
    Account, Acknowledger, ChannelLister, ChannelParser, ChannelRecord, ChannelRepository,
    ChannelTask, Delivery, DeliveryStream, HarvesterError, MessageQueue, ParseRequest,
    ProgressStore, Proxy, ReleaseNotifier, Result, TaskMessage, TaskSubscriber,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock implementation of MessageQueue for testing
#[derive(Debug, Clone, Default)]
pub struct MockMessageQueue {
    queues: Arc<Mutex<HashMap<String, Vec<TaskMessage>>>>,
    created_queues: Arc<Mutex<Vec<String>>>,
    fail_publish: Arc<Mutex<bool>>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_publish(&self, fail: bool) {
        *self.fail_publish.lock().unwrap() = fail;
    }

    pub fn get_queue_messages(&self, queue: &str) -> Vec<TaskMessage> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_all_messages(&self) -> Vec<TaskMessage> {
        let queues = self.queues.lock().unwrap();
        queues.values().flatten().cloned().collect()
    }

    pub fn created_queues(&self) -> Vec<String> {
        self.created_queues.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.queues.lock().unwrap().clear();
        self.created_queues.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn publish_message(&self, queue: &str, message: &TaskMessage) -> Result<()> {
        if *self.fail_publish.lock().unwrap() {
            return Err(HarvesterError::MessageQueue("模拟发布失败".to_string()));
        }
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(queue.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> Result<()> {
        self.created_queues.lock().unwrap().push(queue.to_string());
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }
}

/// Shared record of ack/nack decisions, keyed by delivery tag
#[derive(Debug, Clone, Default)]
pub struct AckLog {
    acked: Arc<Mutex<Vec<u64>>>,
    nacked: Arc<Mutex<Vec<(u64, bool)>>>,
}

impl AckLog {
    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.nacked.lock().unwrap().clone()
    }

    /// Number of deliveries that received either an ack or a nack
    pub fn settled(&self) -> usize {
        self.acked.lock().unwrap().len() + self.nacked.lock().unwrap().len()
    }
}

pub struct MockAcknowledger {
    tag: u64,
    log: AckLog,
}

#[async_trait]
impl Acknowledger for MockAcknowledger {
    async fn ack(&self) -> Result<()> {
        self.log.acked.lock().unwrap().push(self.tag);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.log.nacked.lock().unwrap().push((self.tag, requeue));
        Ok(())
    }
}

/// One scripted connection: either a list of payloads delivered before the
/// stream ends, or a subscribe failure
#[derive(Debug, Clone)]
pub enum ScriptedConnection {
    Deliver(Vec<Vec<u8>>),
    Fail(String),
}

/// Mock broker subscriber replaying scripted connections in order.
///
/// Once the script runs out the returned stream stays open forever, so a
/// consumer under test idles until it is shut down.
#[derive(Clone, Default)]
pub struct MockTaskSubscriber {
    script: Arc<Mutex<VecDeque<ScriptedConnection>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    next_tag: Arc<AtomicU64>,
    log: AckLog,
}

impl MockTaskSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_connection(&self, connection: ScriptedConnection) {
        self.script.lock().unwrap().push_back(connection);
    }

    /// Script a connection delivering the given task messages
    pub fn push_messages(&self, messages: &[TaskMessage]) {
        let payloads = messages
            .iter()
            .map(|message| serde_json::to_vec(message).unwrap())
            .collect();
        self.push_connection(ScriptedConnection::Deliver(payloads));
    }

    pub fn ack_log(&self) -> AckLog {
        self.log.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn subscribed_queues(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskSubscriber for MockTaskSubscriber {
    async fn subscribe(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        self.subscriptions.lock().unwrap().push(queue.to_string());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedConnection::Fail(reason)) => Err(HarvesterError::MessageQueue(reason)),
            Some(ScriptedConnection::Deliver(payloads)) => {
                let deliveries: Vec<Result<Delivery>> = payloads
                    .into_iter()
                    .map(|data| {
                        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
                        Ok(Delivery {
                            data,
                            delivery_tag: tag,
                            acker: Box::new(MockAcknowledger {
                                tag,
                                log: self.log.clone(),
                            }),
                        })
                    })
                    .collect();
                Ok(stream::iter(deliveries).boxed())
            }
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Mock scraper with per-channel failure scripting
#[derive(Debug, Clone, Default)]
pub struct MockChannelParser {
    always_fail: Arc<Mutex<HashSet<i64>>>,
    fail_first: Arc<Mutex<HashMap<i64, u32>>>,
    panic_on: Arc<Mutex<HashSet<i64>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    attempts: Arc<Mutex<Vec<i64>>>,
    requests: Arc<Mutex<Vec<ParseRequest>>>,
    prepared_accounts: Arc<Mutex<Vec<Vec<String>>>>,
    configured_proxies: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockChannelParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt for this channel fails
    pub fn always_fail(self, channel_id: i64) -> Self {
        self.always_fail.lock().unwrap().insert(channel_id);
        self
    }

    /// The first `times` attempts for this channel fail, later ones succeed
    pub fn fail_times(self, channel_id: i64, times: u32) -> Self {
        self.fail_first.lock().unwrap().insert(channel_id, times);
        self
    }

    pub fn panic_on(self, channel_id: i64) -> Self {
        self.panic_on.lock().unwrap().insert(channel_id);
        self
    }

    /// Each parse call sleeps this long before returning
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Channel ids in the order their attempts started
    pub fn attempts(&self) -> Vec<i64> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, channel_id: i64) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == channel_id)
            .count()
    }

    pub fn attempted_channels(&self) -> HashSet<i64> {
        self.attempts.lock().unwrap().iter().copied().collect()
    }

    pub fn requests(&self) -> Vec<ParseRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of attempts that asked for a fresh session
    pub fn refresh_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.refresh_session)
            .count()
    }

    /// Channel ids whose attempts asked for a fresh session, in order
    pub fn refreshed_channels(&self) -> Vec<i64> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.refresh_session)
            .map(|request| request.channel.channel_id)
            .collect()
    }

    pub fn prepared_accounts(&self) -> Vec<Vec<String>> {
        self.prepared_accounts.lock().unwrap().clone()
    }

    pub fn configured_proxies(&self) -> Vec<Vec<String>> {
        self.configured_proxies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelParser for MockChannelParser {
    async fn parse_channel(&self, request: &ParseRequest) -> Result<()> {
        let channel_id = request.channel.channel_id;
        self.attempts.lock().unwrap().push(channel_id);
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.panic_on.lock().unwrap().contains(&channel_id) {
            panic!("模拟解析器崩溃: {channel_id}");
        }

        if self.always_fail.lock().unwrap().contains(&channel_id) {
            return Err(HarvesterError::Parser(format!("模拟采集失败: {channel_id}")));
        }

        let mut fail_first = self.fail_first.lock().unwrap();
        if let Some(remaining) = fail_first.get_mut(&channel_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HarvesterError::Parser(format!("模拟采集失败: {channel_id}")));
            }
        }

        Ok(())
    }

    async fn prepare_sessions(&self, accounts: &[String]) -> Result<()> {
        self.prepared_accounts.lock().unwrap().push(accounts.to_vec());
        Ok(())
    }

    async fn configure_proxies(&self, proxies: &[String]) -> Result<()> {
        self.configured_proxies.lock().unwrap().push(proxies.to_vec());
        Ok(())
    }
}

/// Mock channel listing endpoint
#[derive(Debug, Clone, Default)]
pub struct MockChannelLister {
    channels: Arc<Mutex<Vec<ChannelTask>>>,
    error: Arc<Mutex<Option<String>>>,
    panics: Arc<Mutex<bool>>,
    calls: Arc<AtomicU64>,
}

impl MockChannelLister {
    pub fn with_channels(channels: Vec<ChannelTask>) -> Self {
        let lister = Self::default();
        *lister.channels.lock().unwrap() = channels;
        lister
    }

    pub fn failing(reason: &str) -> Self {
        let lister = Self::default();
        *lister.error.lock().unwrap() = Some(reason.to_string());
        lister
    }

    /// Every fetch panics, as a crashing collaborator would
    pub fn panicking() -> Self {
        let lister = Self::default();
        *lister.panics.lock().unwrap() = true;
        lister
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelLister for MockChannelLister {
    async fn fetch_channels(&self) -> Result<Vec<ChannelTask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.panics.lock().unwrap() {
            panic!("模拟频道列表接口崩溃");
        }
        if let Some(reason) = self.error.lock().unwrap().clone() {
            return Err(HarvesterError::ChannelListing(reason));
        }
        Ok(self.channels.lock().unwrap().clone())
    }
}

/// Mock release endpoint recording every notified batch id
#[derive(Debug, Clone, Default)]
pub struct MockReleaseNotifier {
    released: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockReleaseNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        *notifier.fail.lock().unwrap() = true;
        notifier
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseNotifier for MockReleaseNotifier {
    async fn notify_release(&self, batch_id: &str) -> Result<()> {
        self.released.lock().unwrap().push(batch_id.to_string());
        if *self.fail.lock().unwrap() {
            return Err(HarvesterError::Http("模拟回调失败".to_string()));
        }
        Ok(())
    }
}

/// In-memory progress store, optionally failing the next N writes
#[derive(Debug, Clone, Default)]
pub struct MockProgressStore {
    batches: Arc<Mutex<HashMap<String, HashSet<i64>>>>,
    failing_writes: Arc<Mutex<u32>>,
    write_calls: Arc<AtomicU64>,
    marked: Arc<Mutex<Vec<(String, i64)>>>,
    cleared: Arc<Mutex<Vec<String>>>,
}

impl MockProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processed(batch_id: &str, processed: &[i64]) -> Self {
        let store = Self::default();
        store
            .batches
            .lock()
            .unwrap()
            .insert(batch_id.to_string(), processed.iter().copied().collect());
        store
    }

    pub fn fail_next_writes(&self, times: u32) {
        *self.failing_writes.lock().unwrap() = times;
    }

    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().unwrap().clone()
    }

    /// Every channel id successfully persisted for the batch, in write order
    pub fn marked(&self, batch_id: &str) -> Vec<i64> {
        self.marked
            .lock()
            .unwrap()
            .iter()
            .filter(|(batch, _)| batch == batch_id)
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn snapshot(&self, batch_id: &str) -> HashSet<i64> {
        self.batches
            .lock()
            .unwrap()
            .get(batch_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProgressStore for MockProgressStore {
    async fn load(&self, batch_id: &str) -> HashSet<i64> {
        self.snapshot(batch_id)
    }

    async fn mark_processed(&self, batch_id: &str, channel_id: i64) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failing = self.failing_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(HarvesterError::Persistence("模拟写入失败".to_string()));
            }
        }
        self.batches
            .lock()
            .unwrap()
            .entry(batch_id.to_string())
            .or_default()
            .insert(channel_id);
        self.marked
            .lock()
            .unwrap()
            .push((batch_id.to_string(), channel_id));
        Ok(())
    }

    async fn clear(&self, batch_id: &str) -> Result<()> {
        self.batches.lock().unwrap().remove(batch_id);
        self.cleared.lock().unwrap().push(batch_id.to_string());
        Ok(())
    }
}

/// Mock implementation of ChannelRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockChannelRepository {
    channels: Arc<Mutex<HashMap<i64, ChannelRecord>>>,
    accounts: Arc<Mutex<Vec<Account>>>,
    proxies: Arc<Mutex<Vec<Proxy>>>,
    get_all_failures: Arc<Mutex<u32>>,
    get_all_calls: Arc<AtomicU64>,
}

impl MockChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: Vec<ChannelRecord>) -> Self {
        let repo = Self::default();
        for channel in channels {
            repo.add_channel(channel);
        }
        repo
    }

    pub fn add_channel(&self, channel: ChannelRecord) {
        self.channels.lock().unwrap().insert(channel.id, channel);
    }

    pub fn remove_channel(&self, id: i64) {
        self.channels.lock().unwrap().remove(&id);
    }

    pub fn update_link(&self, id: i64, link: &str) {
        if let Some(channel) = self.channels.lock().unwrap().get_mut(&id) {
            channel.link = link.to_string();
        }
    }

    pub fn add_account(&self, account: Account) {
        self.accounts.lock().unwrap().push(account);
    }

    pub fn add_proxy(&self, proxy: Proxy) {
        self.proxies.lock().unwrap().push(proxy);
    }

    /// Make the next `times` calls to `get_all` fail
    pub fn fail_next_get_all(&self, times: u32) {
        *self.get_all_failures.lock().unwrap() = times;
    }

    pub fn get_all_calls(&self) -> u64 {
        self.get_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelRepository for MockChannelRepository {
    async fn get_all(&self) -> Result<Vec<ChannelRecord>> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.get_all_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(HarvesterError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "模拟数据库不可用",
                )));
            }
        }
        let mut channels: Vec<ChannelRecord> =
            self.channels.lock().unwrap().values().cloned().collect();
        channels.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(channels)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ChannelRecord>> {
        Ok(self.channels.lock().unwrap().get(&id).cloned())
    }

    async fn get_active_accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|account| account.is_active)
            .cloned()
            .collect())
    }

    async fn get_active_proxies(&self) -> Result<Vec<Proxy>> {
        Ok(self
            .proxies
            .lock()
            .unwrap()
            .iter()
            .filter(|proxy| proxy.is_active)
            .cloned()
            .collect())
    }
}
