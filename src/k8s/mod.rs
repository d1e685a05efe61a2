mod watch;

pub use self::watch::Watch;
pub use gateway_api::apis::standard::gatewayclasses::GatewayClass;
pub use gateway_api::apis::standard::gateways::{Gateway, GatewayListeners};
pub use gateway_api::apis::standard::httproutes::{HTTPRoute, HTTPRouteRulesMatches};
pub use k8s_openapi::api::core::v1::Service;

use crate::events::Event;
use kube::api::Api;
use kube::runtime::watcher;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The protocol accepted by HTTP listeners.
pub const HTTP_PROTOCOL: &str = "HTTP";

/// A (namespace, name) resource key.
///
/// Cluster-scoped resources take the `default` namespace; only their name is
/// ever consulted. Ordering is (namespace, name) ascending, which is the
/// gateway winner tie-break.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NsName {
    ns: Arc<str>,
    name: Arc<str>,
}

/// Tags a watched resource kind in delete events.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Kind {
    GatewayClass,
    Gateway,
    HttpRoute,
    Service,
}

/// One watch per reconciled kind.
pub(crate) struct ResourceWatches {
    gateway_classes: Watch<GatewayClass>,
    gateways: Watch<Gateway>,
    http_routes: Watch<HTTPRoute>,
    services: Watch<Service>,
}

// === impl NsName ===

impl NsName {
    pub fn new(ns: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            ns: ns.into(),
            name: name.into(),
        }
    }

    pub fn from_resource<T: kube::ResourceExt>(t: &T) -> Self {
        let ns = t.namespace().unwrap_or_else(|| "default".into());
        Self::new(ns, t.name_any())
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ns, self.name)
    }
}

// === impl Kind ===

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::GatewayClass => "GatewayClass".fmt(f),
            Kind::Gateway => "Gateway".fmt(f),
            Kind::HttpRoute => "HTTPRoute".fmt(f),
            Kind::Service => "Service".fmt(f),
        }
    }
}

// === impl ResourceWatches ===

impl ResourceWatches {
    pub fn new(client: kube::Client) -> Self {
        Self {
            gateway_classes: watcher(Api::all(client.clone()), watcher::Config::default()).into(),
            gateways: watcher(Api::all(client.clone()), watcher::Config::default()).into(),
            http_routes: watcher(Api::all(client.clone()), watcher::Config::default()).into(),
            services: watcher(Api::all(client), watcher::Config::default()).into(),
        }
    }

    /// Publishes events from all four watches onto `events` until the
    /// receiving side goes away.
    pub async fn watch(self, events: mpsc::UnboundedSender<Event>) {
        let Self {
            gateway_classes,
            gateways,
            http_routes,
            services,
        } = self;

        tokio::join!(
            watch::publish(gateway_classes, Kind::GatewayClass, events.clone()),
            watch::publish(gateways, Kind::Gateway, events.clone()),
            watch::publish(http_routes, Kind::HttpRoute, events.clone()),
            watch::publish(services, Kind::Service, events),
        );
    }
}
