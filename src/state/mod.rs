pub(crate) mod config;
pub(crate) mod graph;
pub(crate) mod service;
pub(crate) mod store;

pub(crate) use self::config::{backend_address, Configuration};
pub(crate) use self::service::ServiceResolver;

use self::config::build_configuration;
use self::graph::build_graph;
use self::store::Store;
use crate::events::Event;
use crate::status::{build_statuses, Statuses};
use tracing::instrument;

/// Owns the resource store and turns captured changes into configuration and
/// status updates.
pub(crate) struct ChangeProcessor {
    gateway_ctlr_name: String,
    gateway_class_name: String,
    store: Store,

    /// The last configuration handed to the apply path.
    last_configuration: Option<Configuration>,

    /// The last status set handed to the status writer; statuses are emitted
    /// as a delta against it.
    last_statuses: Statuses,
}

// === impl ChangeProcessor ===

impl ChangeProcessor {
    pub fn new(gateway_ctlr_name: String, gateway_class_name: String) -> Self {
        let store = Store::new(gateway_class_name.clone());
        Self {
            gateway_ctlr_name,
            gateway_class_name,
            store,
            last_configuration: None,
            last_statuses: Statuses::default(),
        }
    }

    /// Folds an event into the store.
    pub fn capture(&mut self, event: Event) {
        match event {
            Event::Upsert(resource) => self.store.upsert(resource),
            Event::Delete(kind, key) => self.store.delete(kind, &key),
        }
    }

    /// Rebuilds the graph and configuration from the store.
    ///
    /// Returns `None` when the configuration matches what was last emitted
    /// and no status changed, so the caller can skip the apply entirely.
    #[instrument(skip(self))]
    pub fn process(&mut self) -> Option<(Configuration, Statuses)> {
        let graph = build_graph(&self.store, &self.gateway_ctlr_name, &self.gateway_class_name);
        let configuration = build_configuration(&graph);
        let statuses = build_statuses(&graph);

        let status_delta = statuses.diff(&self.last_statuses);
        if self.last_configuration.as_ref() == Some(&configuration) && status_delta.is_empty() {
            return None;
        }

        self.last_configuration = Some(configuration.clone());
        self.last_statuses = statuses;
        Some((configuration, status_delta))
    }

    /// Forgets what was applied. Called after a failed apply or status write
    /// so the next reconcile re-emits everything.
    pub fn reset_applied(&mut self) {
        self.last_configuration = None;
        self.last_statuses = Statuses::default();
    }

    /// The store doubles as the Service resolver for the renderer.
    pub fn resolver(&self) -> &impl ServiceResolver {
        &self.store
    }
}
