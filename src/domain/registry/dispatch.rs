//! Ordered republish dispatch.
//!
//! Captured store mutations are filtered to modify/remove kinds and routed
//! into one single-consumer channel per `uri`. Events for one list are
//! processed strictly in emission order and never interleave; different
//! lists republish concurrently. This is what prevents two concurrent
//! revocations on the same list from racing their republishes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::models::ChangeEvent;
use super::publisher::{ListPublisher, PublishError};

/// The dispatcher's view of the publisher: republish one list.
#[async_trait]
pub trait UriPublisher: Send + Sync {
    async fn publish_uri(&self, uri: &str) -> Result<(), PublishError>;
}

#[async_trait]
impl UriPublisher for ListPublisher {
    async fn publish_uri(&self, uri: &str) -> Result<(), PublishError> {
        self.publish(uri).await.map(|_| ())
    }
}

pub struct OrderedDispatcher {
    publisher: Arc<dyn UriPublisher>,
}

impl OrderedDispatcher {
    pub fn new(publisher: Arc<dyn UriPublisher>) -> Self {
        Self { publisher }
    }

    /// Consumes the change-event stream until the sender side closes, then
    /// drains every per-URI worker.
    pub fn spawn(self, events: mpsc::UnboundedReceiver<ChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(self, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
        let mut shards: HashMap<String, mpsc::UnboundedSender<ChangeEvent>> = HashMap::new();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while let Some(event) = events.recv().await {
            // Creation events are not republish triggers.
            if !event.triggers_republish() {
                continue;
            }

            let shard = shards.entry(event.uri.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                workers.push(tokio::spawn(consume(
                    self.publisher.clone(),
                    event.uri.clone(),
                    rx,
                )));
                tx
            });

            // Workers live until their sender drops, so this only fails if
            // one panicked; surface that loudly.
            if shard.send(event.clone()).is_err() {
                error!(uri = %event.uri, "per-uri publish worker is gone, event lost");
                shards.remove(&event.uri);
            }
        }

        drop(shards);
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn consume(
    publisher: Arc<dyn UriPublisher>,
    uri: String,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
) {
    while let Some(event) = events.recv().await {
        debug!(uri = %uri, kind = ?event.kind, idx = event.idx, "republishing after change");
        if let Err(e) = publisher.publish_uri(&uri).await {
            // The publisher does not retry; redelivery is the upstream's job.
            error!(uri = %uri, "failed to republish status list: {e}");
        }
    }
}
