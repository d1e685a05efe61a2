mod updater;

pub(crate) use self::updater::{StatusWriter, Updater};

use crate::k8s::NsName;
use crate::state::graph::Graph;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// What to write back for which resources, captured at observation time.
///
/// Produced as a delta: resources whose conditions match what was last
/// emitted are omitted, so a no-op reconcile carries an empty set.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Statuses {
    pub gateway_class: Option<GatewayClassStatus>,
    pub gateway: Option<GatewayStatus>,
    pub ignored_gateways: HashMap<NsName, IgnoredGatewayStatus>,
    pub http_routes: HashMap<NsName, RouteStatus>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GatewayClassStatus {
    pub name: String,
    pub generation: Option<i64>,
    pub accepted: bool,
    pub message: String,
}

/// Per-listener readiness for the winner Gateway.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GatewayStatus {
    pub key: NsName,
    pub generation: Option<i64>,
    pub listeners: BTreeMap<String, ListenerStatus>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ListenerStatus {
    pub ready: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct IgnoredGatewayStatus {
    pub generation: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RouteStatus {
    pub generation: Option<i64>,
    pub parents: Vec<ParentStatus>,
}

/// One condition per sectionName reference recognized on a route.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ParentStatus {
    pub gateway: NsName,
    pub section_name: String,
    pub accepted: bool,
}

/// A source of condition transition timestamps. Injectable for tests.
pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub(crate) struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// === impl Statuses ===

impl Statuses {
    pub fn is_empty(&self) -> bool {
        self.gateway_class.is_none()
            && self.gateway.is_none()
            && self.ignored_gateways.is_empty()
            && self.http_routes.is_empty()
    }

    /// The entries of `self` that differ from `last`. Resources that vanished
    /// from `self` are dropped silently: their status cannot be written.
    pub fn diff(&self, last: &Statuses) -> Statuses {
        Statuses {
            gateway_class: self
                .gateway_class
                .clone()
                .filter(|gc| last.gateway_class.as_ref() != Some(gc)),
            gateway: self
                .gateway
                .clone()
                .filter(|gw| last.gateway.as_ref() != Some(gw)),
            ignored_gateways: self
                .ignored_gateways
                .iter()
                .filter(|&(key, status)| last.ignored_gateways.get(key) != Some(status))
                .map(|(key, status)| (key.clone(), status.clone()))
                .collect(),
            http_routes: self
                .http_routes
                .iter()
                .filter(|&(key, status)| last.http_routes.get(key) != Some(status))
                .map(|(key, status)| (key.clone(), status.clone()))
                .collect(),
        }
    }
}

/// Derives the full status intent from a graph.
pub(crate) fn build_statuses(graph: &Graph) -> Statuses {
    let gateway_class = graph.gateway_class.as_ref().map(|gc| GatewayClassStatus {
        name: gc.source.metadata.name.clone().unwrap_or_default(),
        generation: gc.source.metadata.generation,
        accepted: gc.valid,
        message: gc.error_msg.clone(),
    });

    let gateway = graph.gateway.as_ref().map(|gw| GatewayStatus {
        key: NsName::from_resource(gw.as_ref()),
        generation: gw.metadata.generation,
        listeners: graph
            .listeners
            .iter()
            .map(|(name, l)| (name.clone(), ListenerStatus { ready: l.valid }))
            .collect(),
    });

    let ignored_gateways = graph
        .ignored_gateways
        .iter()
        .map(|(key, gw)| {
            (
                key.clone(),
                IgnoredGatewayStatus {
                    generation: gw.metadata.generation,
                },
            )
        })
        .collect();

    let http_routes = graph
        .routes
        .iter()
        .map(|(key, route)| {
            let mut parents = Vec::with_capacity(
                route.valid_section_name_refs.len() + route.invalid_section_name_refs.len(),
            );
            for section in route.valid_section_name_refs.iter() {
                parents.push(ParentStatus {
                    gateway: ref_gateway(graph, key, section),
                    section_name: section.clone(),
                    accepted: true,
                });
            }
            for section in route.invalid_section_name_refs.iter() {
                parents.push(ParentStatus {
                    gateway: ref_gateway(graph, key, section),
                    section_name: section.clone(),
                    accepted: false,
                });
            }
            parents.sort();

            (
                key.clone(),
                RouteStatus {
                    generation: route.source.metadata.generation,
                    parents,
                },
            )
        })
        .collect();

    Statuses {
        gateway_class,
        gateway,
        ignored_gateways,
        http_routes,
    }
}

/// The gateway a route's sectionName reference pointed at, recovered from
/// the route spec. Falls back to the winner when the spec no longer names
/// the section.
fn ref_gateway(graph: &Graph, route_key: &NsName, section: &str) -> NsName {
    let route = &graph.routes[route_key];
    for p in route.source.spec.parent_refs.iter().flatten() {
        if p.section_name.as_deref() == Some(section) {
            let ns = p
                .namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| route_key.namespace());
            return NsName::new(ns, p.name.as_str());
        }
    }
    graph
        .gateway
        .as_ref()
        .map(|gw| NsName::from_resource(gw.as_ref()))
        .unwrap_or_else(|| route_key.clone())
}
