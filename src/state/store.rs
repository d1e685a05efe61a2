use crate::events::Resource;
use crate::k8s::{Gateway, GatewayClass, HTTPRoute, Kind, NsName, Service};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The latest observed snapshot of every watched resource.
///
/// Not concurrency-safe; the event loop is the sole writer. Values are held
/// behind `Arc` so the graph and configuration can reference them without
/// copying.
pub(crate) struct Store {
    gateway_class_name: String,

    /// The GatewayClass is a singleton: only the resource whose name matches
    /// the configured gatewayclass name is retained.
    pub gateway_class: Option<Arc<GatewayClass>>,

    pub gateways: HashMap<NsName, Arc<Gateway>>,
    pub http_routes: HashMap<NsName, Arc<HTTPRoute>>,
    pub services: HashMap<NsName, Arc<Service>>,
}

// === impl Store ===

impl Store {
    pub fn new(gateway_class_name: String) -> Self {
        Self {
            gateway_class_name,
            gateway_class: None,
            gateways: HashMap::default(),
            http_routes: HashMap::default(),
            services: HashMap::default(),
        }
    }

    pub fn upsert(&mut self, resource: Resource) {
        match resource {
            Resource::GatewayClass(gc) => {
                let key = NsName::from_resource(&gc);
                if key.name() == self.gateway_class_name {
                    self.gateway_class = Some(Arc::new(gc));
                } else {
                    debug!(%key, "Ignoring GatewayClass with a foreign name");
                }
            }
            Resource::Gateway(gw) => {
                self.gateways.insert(NsName::from_resource(&gw), Arc::new(gw));
            }
            Resource::HttpRoute(hr) => {
                self.http_routes
                    .insert(NsName::from_resource(&hr), Arc::new(hr));
            }
            Resource::Service(svc) => {
                self.services
                    .insert(NsName::from_resource(&svc), Arc::new(svc));
            }
        }
    }

    pub fn delete(&mut self, kind: Kind, key: &NsName) {
        match kind {
            Kind::GatewayClass => {
                if key.name() == self.gateway_class_name {
                    self.gateway_class = None;
                }
            }
            Kind::Gateway => {
                self.gateways.remove(key);
            }
            Kind::HttpRoute => {
                self.http_routes.remove(key);
            }
            Kind::Service => {
                self.services.remove(key);
            }
        }
    }
}
