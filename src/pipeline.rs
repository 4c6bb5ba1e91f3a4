//! Explicit bootstrap of the whole relay.
//!
//! `Pipeline::start` wires bus → batcher → transport → handler → store and
//! owns every piece. Nothing here is a process-wide singleton; tests build
//! as many pipelines as they like.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bus::{ChannelTransport, EventBatcher, EventBus};
use crate::config::PipelineConfig;
use crate::consumer::EventHandler;
use crate::store::Store;
use crate::RelayError;

pub struct Pipeline {
    bus: Arc<EventBus>,
    batcher: EventBatcher,
    handler: Arc<EventHandler>,
    store: Store,
    bridge: JoinHandle<()>,
    bridge_stop: oneshot::Sender<()>,
    consumer: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl Pipeline {
    /// Must be called from within a tokio runtime.
    pub fn start(config: PipelineConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let (transport, rx) = ChannelTransport::pair();
        let bus = Arc::new(EventBus::new());
        let batcher = EventBatcher::new(config.batcher.clone(), Arc::new(transport))?;
        let store = Store::new(&config.store);
        let handler = Arc::new(EventHandler::new(store.clone(), &config.stream)?);

        let (bridge_stop, bridge_stop_rx) = oneshot::channel();
        let bridge = batcher.attach(bus.subscribe(), bridge_stop_rx);
        let (stop, stop_rx) = oneshot::channel();
        let consumer = Arc::clone(&handler).spawn(rx, stop_rx);

        tracing::info!(
            batch_interval_ms = config.batcher.batch_interval_ms,
            background_interval_ms = config.batcher.background_interval_ms,
            stream_flush_ms = config.stream.flush_interval_ms,
            "ui relay pipeline started"
        );

        Ok(Self {
            bus,
            batcher,
            handler,
            store,
            bridge,
            bridge_stop,
            consumer,
            stop,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn batcher(&self) -> &EventBatcher {
        &self.batcher
    }

    pub fn handler(&self) -> &Arc<EventHandler> {
        &self.handler
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Ordered teardown: forward whatever is already on the bus, flush the
    /// batcher once, let the consumer drain what crossed, then flush the
    /// consumer-side buffers and the store's micro-batch.
    pub async fn shutdown(self) {
        let _ = self.bridge_stop.send(());
        if let Err(e) = self.bridge.await {
            tracing::warn!("event bus bridge task failed: {e}");
        }
        self.batcher.shutdown();

        let _ = self.stop.send(());
        if let Err(e) = self.consumer.await {
            tracing::warn!("event handler task failed: {e}");
        }

        self.handler.shutdown();
        self.store.shutdown();
        tracing::info!("ui relay pipeline shut down");
    }
}
