//! Background projection of orders into the search index.
//!
//! Order protocols enqueue upserts and deletes without waiting; a single tokio
//! task applies them in order. Index failures are logged and never reach the
//! caller: the index may lag or miss a change until the next full resync.
//!
//! On start the worker declares index settings and, when the index is empty
//! (or its stats are unavailable), backfills every stored order in batches of
//! [`BACKFILL_BATCH_SIZE`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use stockorder_core::{OrderId, ProductId};
use stockorder_orders::Order;
use stockorder_products::ProductSummary;

use crate::catalog::{CatalogError, ProductCatalog};
use crate::repository::{OrderRepository, RepositoryError};
use crate::search::{IndexSettings, OrderDocument, SearchError, SearchIndex, SearchPage, SearchQuery};

pub const BACKFILL_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug)]
enum IndexCommand {
    Upsert(Order),
    Delete(OrderId),
}

/// Settings are declared at most once per process (retried after a failure).
#[derive(Clone)]
struct SettingsGate {
    index: Arc<dyn SearchIndex>,
    settings: IndexSettings,
    ready: Arc<OnceCell<()>>,
}

impl SettingsGate {
    async fn ensure(&self) -> Result<(), SearchError> {
        self.ready
            .get_or_try_init(|| async { self.index.ensure_settings(&self.settings).await })
            .await
            .map(|_| ())
    }
}

/// Cloneable front of the projector: enqueue changes, run list queries.
#[derive(Clone)]
pub struct SearchProjector {
    tx: mpsc::Sender<IndexCommand>,
    gate: SettingsGate,
}

impl std::fmt::Debug for SearchProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchProjector")
            .field("queued", &(self.tx.max_capacity() - self.tx.capacity()))
            .finish_non_exhaustive()
    }
}

/// Handle to stop and join the projector task. Dropping it also stops the
/// task once the queue drains.
#[derive(Debug)]
pub struct ProjectorHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ProjectorHandle {
    /// Stop accepting commands, apply everything already queued, then wait for
    /// the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.join.await {
            error!(error = %err, "search projector task failed");
        }
    }
}

impl SearchProjector {
    /// Spawn the projector task. Must be called from within a tokio runtime.
    pub fn spawn<I, R, C>(
        index: I,
        orders: R,
        catalog: C,
        queue_capacity: usize,
    ) -> (Self, ProjectorHandle)
    where
        I: SearchIndex + 'static,
        R: OrderRepository + 'static,
        C: ProductCatalog + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let gate = SettingsGate {
            index: Arc::new(index),
            settings: IndexSettings::for_orders(),
            ready: Arc::new(OnceCell::new()),
        };

        let worker = Worker {
            gate: gate.clone(),
            orders: Arc::new(orders),
            catalog: Arc::new(catalog),
        };
        let join = tokio::spawn(worker.run(rx, shutdown_rx));

        (
            Self { tx, gate },
            ProjectorHandle {
                shutdown: shutdown_tx,
                join,
            },
        )
    }

    /// Queue an order for (re)indexing. Dropped with a warning if the queue is
    /// full or the projector has stopped.
    pub fn upsert(&self, order: Order) {
        let order_id = order.id;
        self.enqueue(order_id, IndexCommand::Upsert(order));
    }

    /// Queue an order's removal from the index.
    pub fn delete(&self, order_id: OrderId) {
        self.enqueue(order_id, IndexCommand::Delete(order_id));
    }

    fn enqueue(&self, order_id: OrderId, command: IndexCommand) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(order_id = %order_id, "search projector queue full; index update dropped");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(order_id = %order_id, "search projector stopped; index update dropped");
            }
        }
    }

    /// Run a list query against the index.
    pub async fn list(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        self.gate.ensure().await?;
        self.gate.index.search(query).await
    }
}

struct Worker {
    gate: SettingsGate,
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn ProductCatalog>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<IndexCommand>, mut shutdown: oneshot::Receiver<()>) {
        self.bootstrap().await;

        loop {
            tokio::select! {
                biased;
                command = rx.recv() => match command {
                    Some(command) => self.apply(command).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    rx.close();
                    while let Some(command) = rx.recv().await {
                        self.apply(command).await;
                    }
                    break;
                }
            }
        }
        info!("search projector stopped");
    }

    async fn bootstrap(&self) {
        if let Err(err) = self.gate.ensure().await {
            warn!(error = %err, "failed to declare search index settings");
        }

        match self.gate.index.document_count().await {
            Ok(0) => {}
            Ok(documents) => {
                debug!(documents, "search index populated; skipping backfill");
                return;
            }
            Err(err) => warn!(error = %err, "search index stats unavailable; backfilling"),
        }

        match self.backfill().await {
            Ok(indexed) => info!(indexed, "search index backfill complete"),
            Err(err) => error!(error = %err, "search index backfill aborted"),
        }
    }

    async fn backfill(&self) -> Result<u64, ProjectorError> {
        let mut offset: u64 = 0;
        loop {
            let page = self.orders.fetch_page(BACKFILL_BATCH_SIZE, offset).await?;
            if page.is_empty() {
                break;
            }
            let documents = self.documents(&page).await?;
            self.gate.index.upsert(&documents).await?;

            offset += page.len() as u64;
            debug!(offset, "search index backfill batch written");
            if page.len() < BACKFILL_BATCH_SIZE as usize {
                break;
            }
        }
        Ok(offset)
    }

    async fn documents(&self, orders: &[Order]) -> Result<Vec<OrderDocument>, CatalogError> {
        let product_ids: Vec<ProductId> = orders
            .iter()
            .flat_map(|o| o.lines.iter().map(|l| l.product_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let summaries: HashMap<ProductId, ProductSummary> = self
            .catalog
            .get_products(&product_ids)
            .await?
            .into_iter()
            .map(|(id, product)| (id, product.summary()))
            .collect();

        Ok(orders
            .iter()
            .map(|o| OrderDocument::from_order(o, &summaries))
            .collect())
    }

    async fn apply(&self, command: IndexCommand) {
        match command {
            IndexCommand::Upsert(order) => {
                let result = match self.documents(std::slice::from_ref(&order)).await {
                    Ok(documents) => self.gate.index.upsert(&documents).await.map_err(ProjectorError::from),
                    Err(err) => Err(err.into()),
                };
                if let Err(err) = result {
                    warn!(order_id = %order.id, error = %err, "failed to index order");
                }
            }
            IndexCommand::Delete(order_id) => {
                if let Err(err) = self.gate.index.delete(order_id).await {
                    warn!(order_id = %order_id, error = %err, "failed to remove order from index");
                }
            }
        }
    }
}
