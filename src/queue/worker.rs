//! Declares the broker topology and dispatches deliveries to the file engine.
//!
//! Settlement policy for every delivery:
//! - body that does not decode: reject, and report the decode error;
//! - handler fails with `RESOURCE_NOTFOUND` or `ACTION_FORBIDDEN`: ack, the
//!   work is impossible or already done;
//! - handler fails otherwise: nack for redelivery;
//! - handler succeeds: ack.
//!
//! A delivery interrupted by shutdown is left unsettled for the broker to
//! redeliver.

use super::{
    BindQueueParam, DeclareExchangeParam, DeclareQueueParam, EXCHANGE_FILE_DELETION,
    EXCHANGE_FILE_REPLICATION, ExchangeKind, Listener, Message, QUEUE_PROCEED_FILE_DELETION,
    QUEUE_PROCEED_FILE_REPLICATION, QueueError, QueueResult, Queuer, SubscribeParam,
};
use crate::{
    errors::AppResult,
    models::message::{DeleteFileMessage, ScheduleReplicationMessage},
    services::FileService,
};
use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture, future::try_join_all};
use serde::de::DeserializeOwned;
use std::{marker::PhantomData, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Handle<M> = Arc<dyn Fn(M) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// Decodes a JSON body into `M`, runs the handler and settles the message.
pub struct MessageHandler<M> {
    queue: &'static str,
    handle: Handle<M>,
    shutdown: CancellationToken,
    _message: PhantomData<fn(M)>,
}

impl<M> MessageHandler<M> {
    pub fn new<F>(queue: &'static str, shutdown: CancellationToken, handle: F) -> Self
    where
        F: Fn(M) -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static,
    {
        Self {
            queue,
            handle: Arc::new(handle),
            shutdown,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M> Listener for MessageHandler<M>
where
    M: DeserializeOwned + Send + 'static,
{
    async fn handle(&self, message: Box<dyn Message>) -> QueueResult<()> {
        let payload: M = match serde_json::from_slice(message.body()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(queue = self.queue, "dropping undecodable message: {}", err);
                message.reject().await?;
                return Err(QueueError::Decode(err));
            }
        };

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(QueueError::Cancelled),
            result = (self.handle)(payload) => result,
        };

        match result {
            Ok(()) => message.ack().await,
            Err(err) if err.is_terminal() => {
                debug!(queue = self.queue, "acking settled work: {}", err);
                message.ack().await
            }
            Err(err) => {
                warn!(queue = self.queue, "handler failed, requeueing: {}", err);
                message.nack().await?;
                Err(QueueError::Handler(err.to_string()))
            }
        }
    }
}

/// Owns the queue topology and subscribes the file engine's handlers.
pub struct WorkerHost {
    queuer: Arc<dyn Queuer>,
    files: FileService,
    shutdown: CancellationToken,
}

impl WorkerHost {
    pub fn new(queuer: Arc<dyn Queuer>, files: FileService, shutdown: CancellationToken) -> Self {
        Self {
            queuer,
            files,
            shutdown,
        }
    }

    /// Exchange and queue pairs, bound one to one.
    const TOPOLOGY: [(&'static str, &'static str); 2] = [
        (EXCHANGE_FILE_REPLICATION, QUEUE_PROCEED_FILE_REPLICATION),
        (EXCHANGE_FILE_DELETION, QUEUE_PROCEED_FILE_DELETION),
    ];

    /// Declares the topology and starts consuming. Any declaration failure
    /// fails startup.
    pub async fn start(&self) -> QueueResult<()> {
        self.queuer.open().await?;

        try_join_all(Self::TOPOLOGY.iter().map(|(exchange, _)| {
            self.queuer.declare_exchange(DeclareExchangeParam {
                name: exchange.to_string(),
                kind: ExchangeKind::Fanout,
            })
        }))
        .await?;

        let queues = try_join_all(Self::TOPOLOGY.iter().map(|(_, queue)| {
            self.queuer.declare_queue(DeclareQueueParam {
                name: queue.to_string(),
            })
        }))
        .await?;

        try_join_all(
            Self::TOPOLOGY
                .iter()
                .zip(&queues)
                .map(|((exchange, _), queue)| {
                    self.queuer.bind_queue(BindQueueParam {
                        exchange: exchange.to_string(),
                        queue: queue.name.clone(),
                    })
                }),
        )
        .await?;

        let files = self.files.clone();
        let replication = MessageHandler::new(
            QUEUE_PROCEED_FILE_REPLICATION,
            self.shutdown.clone(),
            move |message: ScheduleReplicationMessage| {
                let files = files.clone();
                async move {
                    files
                        .proceed_replication(message.location_id)
                        .await
                        .map(|_| ())
                }
                .boxed()
            },
        );

        let files = self.files.clone();
        let deletion = MessageHandler::new(
            QUEUE_PROCEED_FILE_DELETION,
            self.shutdown.clone(),
            move |message: DeleteFileMessage| {
                let files = files.clone();
                async move { files.proceed_deletion(message.location_id).await.map(|_| ()) }.boxed()
            },
        );

        self.queuer
            .subscribe(SubscribeParam {
                queue: QUEUE_PROCEED_FILE_REPLICATION.to_string(),
                listener: Arc::new(replication),
            })
            .await?;
        self.queuer
            .subscribe(SubscribeParam {
                queue: QUEUE_PROCEED_FILE_DELETION.to_string(),
                listener: Arc::new(deletion),
            })
            .await?;

        info!("queue workers subscribed to {} queue(s)", Self::TOPOLOGY.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Settled {
        Ack,
        Nack,
        Reject,
    }

    /// Records how it was settled.
    struct Recorded {
        body: Vec<u8>,
        settled: Arc<Mutex<Vec<Settled>>>,
    }

    impl Recorded {
        fn new(body: &[u8]) -> (Box<dyn Message>, Arc<Mutex<Vec<Settled>>>) {
            let settled = Arc::new(Mutex::new(Vec::new()));
            let message = Recorded {
                body: body.to_vec(),
                settled: settled.clone(),
            };
            (Box::new(message), settled)
        }

        fn record(&self, how: Settled) -> QueueResult<()> {
            self.settled.lock().unwrap().push(how);
            Ok(())
        }
    }

    #[async_trait]
    impl Message for Recorded {
        fn body(&self) -> &[u8] {
            &self.body
        }

        async fn ack(&self) -> QueueResult<()> {
            self.record(Settled::Ack)
        }

        async fn nack(&self) -> QueueResult<()> {
            self.record(Settled::Nack)
        }

        async fn reject(&self) -> QueueResult<()> {
            self.record(Settled::Reject)
        }
    }

    #[derive(Deserialize)]
    struct Ping {
        outcome: String,
    }

    fn handler(shutdown: CancellationToken) -> MessageHandler<Ping> {
        MessageHandler::new("ping", shutdown, |ping: Ping| {
            async move {
                match ping.outcome.as_str() {
                    "ok" => Ok(()),
                    "missing" => Err(AppError::not_found("file is not found")),
                    "done" => Err(AppError::forbidden("replication is already proceeded")),
                    "hang" => futures::future::pending().await,
                    _ => Err(AppError::action_failed("network error")),
                }
            }
            .boxed()
        })
    }

    async fn settle(body: &[u8]) -> (QueueResult<()>, Vec<Settled>) {
        let (message, settled) = Recorded::new(body);
        let result = handler(CancellationToken::new()).handle(message).await;
        let settled = settled.lock().unwrap().clone();
        (result, settled)
    }

    #[tokio::test]
    async fn success_is_acked() {
        let (result, settled) = settle(br#"{"outcome":"ok"}"#).await;
        assert!(result.is_ok());
        assert_eq!(settled, vec![Settled::Ack]);
    }

    #[tokio::test]
    async fn terminal_errors_are_acked() {
        for outcome in ["missing", "done"] {
            let body = format!(r#"{{"outcome":"{outcome}"}}"#);
            let (result, settled) = settle(body.as_bytes()).await;
            assert!(result.is_ok(), "{outcome}");
            assert_eq!(settled, vec![Settled::Ack], "{outcome}");
        }
    }

    #[tokio::test]
    async fn transient_errors_are_nacked() {
        let (result, settled) = settle(br#"{"outcome":"boom"}"#).await;
        assert!(matches!(result, Err(QueueError::Handler(_))));
        assert_eq!(settled, vec![Settled::Nack]);
    }

    #[tokio::test]
    async fn undecodable_body_is_rejected() {
        let (result, settled) = settle(b"not json").await;
        assert!(matches!(result, Err(QueueError::Decode(_))));
        assert_eq!(settled, vec![Settled::Reject]);
    }

    #[tokio::test]
    async fn shutdown_leaves_message_unsettled() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (message, settled) = Recorded::new(br#"{"outcome":"hang"}"#);

        let result = handler(shutdown).handle(message).await;
        assert!(matches!(result, Err(QueueError::Cancelled)));
        assert!(settled.lock().unwrap().is_empty());
    }
}
