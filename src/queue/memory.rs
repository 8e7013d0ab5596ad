//! In-process broker.
//!
//! Each queue is a buffer plus a `Notify`; a subscription spawns one consumer
//! task that hands deliveries to the listener on their own tasks, at most
//! `prefetch` at a time. A message dropped without being settled goes back to
//! its queue, the same as an unacked delivery on a broker connection reset.
//! Nacked and dropped messages wait out a retry delay that doubles with every
//! redelivery, capped at [`MAX_RETRY_DELAY`].

use super::{
    BindQueueParam, DeclareExchangeParam, DeclareQueueParam, DeclareQueueResult, Listener,
    Message, PublishParam, QueueError, QueueResult, Queuer, SubscribeParam,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{Notify, OwnedSemaphorePermit, RwLock, Semaphore},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Delay before the redelivery that follows `attempts` earlier ones.
fn retry_delay(base: Duration, attempts: u32) -> Duration {
    base.saturating_mul(1u32 << attempts.min(16)).min(MAX_RETRY_DELAY)
}

struct Delivery {
    body: Bytes,
    /// Times this body has already been handed out and not settled.
    attempts: u32,
}

#[derive(Default)]
struct Slot {
    buffer: Mutex<VecDeque<Delivery>>,
    notify: Notify,
    subscribed: AtomicBool,
}

impl Slot {
    fn push(&self, delivery: Delivery) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(delivery);
        self.notify.notify_one();
    }

    /// Pushes `delivery` once `delay` has passed. Without a runtime to wait
    /// on, it goes back immediately.
    fn push_after(self: &Arc<Self>, delivery: Delivery, delay: Duration) {
        if delay.is_zero() {
            return self.push(delivery);
        }
        match Handle::try_current() {
            Ok(handle) => {
                let slot = self.clone();
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    slot.push(delivery);
                });
            }
            Err(_) => self.push(delivery),
        }
    }

    fn pop(&self) -> Option<Delivery> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn next(&self, shutdown: &CancellationToken) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.pop() {
                return Some(delivery);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }
}

#[derive(Default)]
struct Topology {
    open: bool,
    /// Exchange name to the queues bound to it.
    exchanges: HashMap<String, HashSet<String>>,
    queues: HashMap<String, Arc<Slot>>,
}

#[derive(Clone)]
pub struct MemoryQueue {
    topology: Arc<RwLock<Topology>>,
    prefetch: usize,
    retry_delay: Duration,
    shutdown: CancellationToken,
}

impl MemoryQueue {
    /// `prefetch` bounds the number of unsettled deliveries per queue.
    pub fn new(prefetch: usize, shutdown: CancellationToken) -> Self {
        Self {
            topology: Arc::new(RwLock::new(Topology::default())),
            prefetch: prefetch.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
            shutdown,
        }
    }

    /// Sets the delay before the first redelivery of a nacked message.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Number of messages waiting in `queue`, excluding in-flight deliveries
    /// and redeliveries still waiting out their delay.
    pub async fn depth(&self, queue: &str) -> QueueResult<usize> {
        Ok(self.slot(queue).await?.len())
    }

    /// Stops every consumer. Messages still buffered stay where they are.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    async fn slot(&self, queue: &str) -> QueueResult<Arc<Slot>> {
        let topology = self.topology.read().await;
        if !topology.open {
            return Err(QueueError::NotOpen);
        }
        topology
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))
    }

    async fn consume(
        queue: String,
        slot: Arc<Slot>,
        listener: Arc<dyn Listener>,
        prefetch: usize,
        retry_delay: Duration,
        shutdown: CancellationToken,
    ) {
        let permits = Arc::new(Semaphore::new(prefetch));
        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Some(delivery) = slot.next(&shutdown).await else {
                break;
            };

            let message = MemoryMessage {
                delivery,
                slot: slot.clone(),
                retry_delay,
                settled: AtomicBool::new(false),
                _permit: permit,
            };
            let listener = listener.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                if let Err(err) = listener.handle(Box::new(message)).await {
                    warn!(queue = %queue, "listener failed: {}", err);
                }
            });
        }
        debug!(queue = %queue, "consumer stopped");
    }
}

#[async_trait]
impl Queuer for MemoryQueue {
    async fn open(&self) -> QueueResult<()> {
        self.topology.write().await.open = true;
        info!(
            "in-memory queue opened (prefetch {}, retry delay {:?})",
            self.prefetch, self.retry_delay
        );
        Ok(())
    }

    async fn declare_exchange(&self, param: DeclareExchangeParam) -> QueueResult<()> {
        let mut topology = self.topology.write().await;
        if !topology.open {
            return Err(QueueError::NotOpen);
        }
        topology.exchanges.entry(param.name).or_default();
        Ok(())
    }

    async fn declare_queue(&self, param: DeclareQueueParam) -> QueueResult<DeclareQueueResult> {
        let mut topology = self.topology.write().await;
        if !topology.open {
            return Err(QueueError::NotOpen);
        }
        topology.queues.entry(param.name.clone()).or_default();
        Ok(DeclareQueueResult { name: param.name })
    }

    async fn bind_queue(&self, param: BindQueueParam) -> QueueResult<()> {
        let mut topology = self.topology.write().await;
        if !topology.open {
            return Err(QueueError::NotOpen);
        }
        if !topology.queues.contains_key(&param.queue) {
            return Err(QueueError::QueueNotFound(param.queue));
        }
        topology
            .exchanges
            .get_mut(&param.exchange)
            .ok_or_else(|| QueueError::ExchangeNotFound(param.exchange.clone()))?
            .insert(param.queue);
        Ok(())
    }

    async fn subscribe(&self, param: SubscribeParam) -> QueueResult<()> {
        let slot = self.slot(&param.queue).await?;
        if slot.subscribed.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadySubscribed(param.queue));
        }

        tokio::spawn(Self::consume(
            param.queue,
            slot,
            param.listener,
            self.prefetch,
            self.retry_delay,
            self.shutdown.clone(),
        ));
        Ok(())
    }

    async fn publish(&self, param: PublishParam) -> QueueResult<()> {
        let topology = self.topology.read().await;
        if !topology.open {
            return Err(QueueError::NotOpen);
        }
        let bound = topology
            .exchanges
            .get(&param.exchange)
            .ok_or_else(|| QueueError::ExchangeNotFound(param.exchange.clone()))?;

        let body = Bytes::from(param.body);
        for queue in bound {
            if let Some(slot) = topology.queues.get(queue) {
                slot.push(Delivery {
                    body: body.clone(),
                    attempts: 0,
                });
            }
        }
        debug!(exchange = %param.exchange, "published to {} queue(s)", bound.len());
        Ok(())
    }
}

struct MemoryMessage {
    delivery: Delivery,
    slot: Arc<Slot>,
    retry_delay: Duration,
    settled: AtomicBool,
    _permit: OwnedSemaphorePermit,
}

impl MemoryMessage {
    fn settle(&self) -> QueueResult<()> {
        if self.settled.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadySettled);
        }
        Ok(())
    }

    fn requeue(&self) {
        let delay = retry_delay(self.retry_delay, self.delivery.attempts);
        let attempts = self.delivery.attempts.saturating_add(1);
        debug!("redelivery {} queued in {:?}", attempts, delay);
        self.slot.push_after(
            Delivery {
                body: self.delivery.body.clone(),
                attempts,
            },
            delay,
        );
    }
}

#[async_trait]
impl Message for MemoryMessage {
    fn body(&self) -> &[u8] {
        &self.delivery.body
    }

    async fn ack(&self) -> QueueResult<()> {
        self.settle()
    }

    async fn nack(&self) -> QueueResult<()> {
        self.settle()?;
        self.requeue();
        Ok(())
    }

    async fn reject(&self) -> QueueResult<()> {
        self.settle()
    }
}

impl Drop for MemoryMessage {
    fn drop(&mut self) {
        if !*self.settled.get_mut() {
            self.requeue();
        }
    }
}
