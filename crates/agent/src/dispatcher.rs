//! Per-identity work queues in front of the pipeline.
//!
//! Each user gets a worker task with its own bounded queue. Messages from
//! one user are handled strictly in receive order; different users run in
//! parallel. When a user's queue is full the message is dropped and the
//! user gets a busy notice. A worker that sees no traffic for `idle_timeout`
//! retires and the next message from that user starts a fresh one.

use crate::pipeline::MessagePipeline;
use concierge_core::channel::InboundMessage;
use concierge_core::message::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

type Workers = Arc<Mutex<HashMap<UserId, Sender<InboundMessage>>>>;

/// Reply sent when a user's queue is full.
pub const BUSY_NOTICE: &str =
    "You're sending messages faster than I can answer. Please wait for my reply.";

/// Routes inbound messages to per-user workers.
pub struct Dispatcher {
    pipeline: Arc<MessagePipeline>,
    workers: Workers,
    idle_timeout: Duration,
    queue_capacity: usize,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<MessagePipeline>) -> Self {
        Self {
            pipeline,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout: Duration::from_secs(60),
            queue_capacity: 32,
        }
    }

    /// Messages a user may have waiting before new ones are dropped.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// How long a worker waits for another message before retiring.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Number of live workers.
    pub fn active_workers(&self) -> usize {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Queue a message behind any earlier ones from the same user.
    ///
    /// Messages without a sender have no queue; they go straight to the
    /// pipeline, which ignores them.
    pub fn dispatch(&self, message: InboundMessage) {
        let Some(user_id) = message.user_id.clone() else {
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                pipeline.handle(message).await;
            });
            return;
        };

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let message = match workers.get(&user_id) {
            Some(tx) => match tx.try_send(message) {
                Ok(()) => return,
                Err(TrySendError::Full(message)) => {
                    warn!(user_id = %user_id, "Worker queue full, dropping message");
                    self.reply_busy(message);
                    return;
                }
                // The worker died; replace it below.
                Err(TrySendError::Closed(message)) => {
                    warn!(user_id = %user_id, "Worker queue closed, restarting worker");
                    message
                }
            },
            None => message,
        };

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        // Cannot fail: the queue is empty and the receiver is alive.
        let _ = tx.try_send(message);
        debug!(user_id = %user_id, "Starting worker");
        tokio::spawn(worker(
            user_id.clone(),
            rx,
            tx.clone(),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.workers),
            self.idle_timeout,
        ));
        workers.insert(user_id, tx);
    }

    fn reply_busy(&self, message: InboundMessage) {
        let channel = Arc::clone(self.pipeline.channel());
        tokio::spawn(async move {
            if let Err(e) = channel.send(&message.chat_id, BUSY_NOTICE).await {
                warn!(chat_id = %message.chat_id, error = %e, "Failed to send busy notice");
            }
        });
    }
}

async fn worker(
    user_id: UserId,
    mut rx: Receiver<InboundMessage>,
    own_tx: Sender<InboundMessage>,
    pipeline: Arc<MessagePipeline>,
    workers: Workers,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(message)) => {
                pipeline.handle(message).await;
            }
            Ok(None) => break,
            Err(_) => {
                // Senders only push while holding the map lock, so an empty
                // queue seen under the lock stays empty once we unregister.
                let next = {
                    let mut map = workers.lock().unwrap_or_else(PoisonError::into_inner);
                    match rx.try_recv() {
                        Ok(message) => Some(message),
                        Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                            if map.get(&user_id).is_some_and(|tx| tx.same_channel(&own_tx)) {
                                map.remove(&user_id);
                            }
                            None
                        }
                    }
                };
                match next {
                    Some(message) => {
                        pipeline.handle(message).await;
                    }
                    None => {
                        debug!(user_id = %user_id, "Worker idle, retiring");
                        break;
                    }
                }
            }
        }
    }
}
