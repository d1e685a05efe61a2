use crate::k8s::{Gateway, GatewayClass, HTTPRoute, Kind, NsName, Service};
use crate::nginx;
use crate::state::ChangeProcessor;
use crate::status::StatusWriter;
use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// A watch notification, as published by the watcher tasks.
#[derive(Debug)]
pub(crate) enum Event {
    Upsert(Resource),
    Delete(Kind, NsName),
}

/// A full watched object. Deletes carry only the key, tagged by kind.
#[derive(Debug)]
pub(crate) enum Resource {
    GatewayClass(GatewayClass),
    Gateway(Gateway),
    HttpRoute(HTTPRoute),
    Service(Service),
}

/// Renders side effects of a new configuration: write the file, reload nginx.
pub(crate) trait Applier {
    async fn apply(&mut self, contents: String) -> Result<()>;
}

/// Consumes the event channel and drives reconciliation strictly
/// sequentially.
///
/// Bursts of events are drained before a single rebuild, so one apply and one
/// reload carry the coalesced configuration. Side-effect failures never stop
/// the loop; the processor forgets its applied state instead so the next
/// event re-attempts a full apply.
pub(crate) struct EventLoop<A, S> {
    processor: ChangeProcessor,
    applier: A,
    status_writer: S,
    events: mpsc::UnboundedReceiver<Event>,
}

// === impl Resource ===

impl From<GatewayClass> for Resource {
    fn from(gc: GatewayClass) -> Self {
        Resource::GatewayClass(gc)
    }
}

impl From<Gateway> for Resource {
    fn from(gw: Gateway) -> Self {
        Resource::Gateway(gw)
    }
}

impl From<HTTPRoute> for Resource {
    fn from(hr: HTTPRoute) -> Self {
        Resource::HttpRoute(hr)
    }
}

impl From<Service> for Resource {
    fn from(svc: Service) -> Self {
        Resource::Service(svc)
    }
}

// === impl EventLoop ===

impl<A: Applier, S: StatusWriter> EventLoop<A, S> {
    pub fn new(
        processor: ChangeProcessor,
        applier: A,
        status_writer: S,
        events: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self {
            processor,
            applier,
            status_writer,
            events,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutting down");
                    return;
                }
                ev = self.events.recv() => match ev {
                    Some(ev) => ev,
                    None => {
                        info!("Event channel closed");
                        return;
                    }
                },
            };
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: Event) {
        self.processor.capture(event);
        // Coalesce bursty arrival into a single rebuild and apply.
        while let Ok(event) = self.events.try_recv() {
            self.processor.capture(event);
        }

        let (configuration, statuses) = match self.processor.process() {
            Some(out) => out,
            None => {
                debug!("Configuration and statuses unchanged; skipping apply");
                return;
            }
        };

        let mut failed = false;

        info!(
            servers = configuration.http_servers.len(),
            "Applying nginx configuration"
        );
        let contents = nginx::config::generate(&configuration, self.processor.resolver());
        if let Err(error) = self.applier.apply(contents).await {
            error!(%error, "Failed to apply the nginx configuration");
            failed = true;
        }

        if !statuses.is_empty() {
            if let Err(error) = self.status_writer.update(&statuses).await {
                error!(%error, "Failed to write statuses");
                failed = true;
            }
        }

        if failed {
            self.processor.reset_applied();
        }
    }
}
