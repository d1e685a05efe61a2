use super::store::Store;
use crate::k8s::{Gateway, GatewayClass, GatewayListeners, HTTPRoute, NsName, HTTP_PROTOCOL};
use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The validated object graph derived from a store snapshot.
///
/// Listeners and routes reference each other by key: a listener holds the
/// keys of its bound routes and `routes` is the side table. This keeps the
/// graph acyclic and value-typed.
#[derive(Debug)]
pub(crate) struct Graph {
    pub gateway_class: Option<GatewayClassInfo>,

    /// The single Gateway this controller reconciles.
    pub gateway: Option<Arc<Gateway>>,

    /// Relevant Gateways that lost winner selection.
    pub ignored_gateways: HashMap<NsName, Arc<Gateway>>,

    /// The winner's listeners by section name.
    pub listeners: HashMap<String, Listener>,

    /// Every route with at least one parentRef recognized by this controller.
    pub routes: HashMap<NsName, Route>,
}

#[derive(Debug)]
pub(crate) struct GatewayClassInfo {
    pub source: Arc<GatewayClass>,
    pub valid: bool,
    pub error_msg: String,
}

#[derive(Debug)]
pub(crate) struct Listener {
    pub source: GatewayListeners,
    pub valid: bool,

    /// Keys into `Graph::routes` for the routes bound to this listener.
    pub routes: HashSet<NsName>,

    /// Union of the hostnames accepted from every bound route.
    pub accepted_hostnames: HashSet<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct Route {
    pub source: Arc<HTTPRoute>,
    pub valid_section_name_refs: HashSet<String>,
    pub invalid_section_name_refs: HashSet<String>,
}

/// Reduces the store snapshot to a validated graph.
///
/// Pure: equal inputs produce equal graphs.
pub(crate) fn build_graph(
    store: &Store,
    gateway_ctlr_name: &str,
    gateway_class_name: &str,
) -> Graph {
    let gateway_class = store
        .gateway_class
        .as_ref()
        .map(|gc| build_gateway_class(gc.clone(), gateway_ctlr_name));

    let (gateway, ignored_gateways) = process_gateways(&store.gateways, gateway_class_name);
    let mut listeners = build_listeners(gateway.as_deref(), gateway_class_name);

    let mut routes = HashMap::new();
    for (key, hr) in store.http_routes.iter() {
        if let Some(route) =
            bind_route_to_listeners(key, hr, gateway.as_deref(), &ignored_gateways, &mut listeners)
        {
            routes.insert(key.clone(), route);
        }
    }

    Graph {
        gateway_class,
        gateway,
        ignored_gateways,
        listeners,
        routes,
    }
}

fn build_gateway_class(gc: Arc<GatewayClass>, gateway_ctlr_name: &str) -> GatewayClassInfo {
    match validate_gateway_class(&gc, gateway_ctlr_name) {
        Ok(()) => GatewayClassInfo {
            source: gc,
            valid: true,
            error_msg: String::new(),
        },
        Err(error) => GatewayClassInfo {
            source: gc,
            valid: false,
            error_msg: error.to_string(),
        },
    }
}

fn validate_gateway_class(gc: &GatewayClass, gateway_ctlr_name: &str) -> anyhow::Result<()> {
    if gc.spec.controller_name != gateway_ctlr_name {
        return Err(anyhow!(
            "Spec.ControllerName must be {} got {}",
            gateway_ctlr_name,
            gc.spec.controller_name
        ));
    }
    Ok(())
}

/// Splits the Gateways referencing our class into a winner and the ignored
/// remainder. The winner is the oldest by creation timestamp; ties fall back
/// to (namespace, name) ascending.
fn process_gateways(
    gateways: &HashMap<NsName, Arc<Gateway>>,
    gateway_class_name: &str,
) -> (Option<Arc<Gateway>>, HashMap<NsName, Arc<Gateway>>) {
    let mut relevant = gateways
        .iter()
        .filter(|(_, gw)| gw.spec.gateway_class_name == gateway_class_name)
        .map(|(key, gw)| (key.clone(), gw.clone()))
        .collect::<Vec<_>>();

    if relevant.is_empty() {
        return (None, HashMap::default());
    }

    relevant.sort_by(|(a_key, a), (b_key, b)| {
        creation_timestamp(a)
            .cmp(&creation_timestamp(b))
            .then_with(|| a_key.cmp(b_key))
    });

    let mut relevant = relevant.into_iter();
    let winner = relevant.next().map(|(_, gw)| gw);
    (winner, relevant.collect())
}

fn creation_timestamp(gw: &Gateway) -> Option<chrono::DateTime<chrono::Utc>> {
    gw.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

/// Builds the listener map for the winner Gateway.
///
/// Listeners failing validation are retained with `valid = false` so status
/// can report them. Collisions — two listeners sharing a section name or
/// claiming the same hostname — demote every party to invalid.
fn build_listeners(
    gateway: Option<&Gateway>,
    gateway_class_name: &str,
) -> HashMap<String, Listener> {
    let mut listeners = HashMap::new();

    let gw = match gateway {
        Some(gw) if gw.spec.gateway_class_name == gateway_class_name => gw,
        _ => return listeners,
    };

    let mut used_hostnames: HashMap<String, String> = HashMap::new();

    for l in gw.spec.listeners.iter() {
        let mut valid = validate_listener(l);

        if let Some(prior) = listeners.get_mut(&l.name) {
            prior.valid = false;
            valid = false;
        }

        let hostname = listener_hostname(l.hostname.as_deref()).to_string();
        match used_hostnames.get(&hostname) {
            Some(prior_name) => {
                valid = false;
                if let Some(prior) = listeners.get_mut(prior_name) {
                    prior.valid = false;
                }
            }
            None => {
                used_hostnames.insert(hostname, l.name.clone());
            }
        }

        listeners.insert(
            l.name.clone(),
            Listener {
                source: l.clone(),
                valid,
                routes: HashSet::default(),
                accepted_hostnames: HashSet::default(),
            },
        );
    }

    listeners
}

/// Only one HTTP listener on port 80 is supported.
fn validate_listener(l: &GatewayListeners) -> bool {
    l.port == 80 && l.protocol == HTTP_PROTOCOL
}

fn listener_hostname(hostname: Option<&str>) -> &str {
    hostname.unwrap_or_default()
}

/// Binds a route to the winner's listeners, recording per-sectionName
/// validity. Returns `None` when no parentRef targets this controller; such
/// routes are absent from the graph entirely.
fn bind_route_to_listeners(
    key: &NsName,
    hr: &Arc<HTTPRoute>,
    gateway: Option<&Gateway>,
    ignored_gateways: &HashMap<NsName, Arc<Gateway>>,
    listeners: &mut HashMap<String, Listener>,
) -> Option<Route> {
    let gw = gateway?;
    let gw_key = NsName::from_resource(gw);

    let mut route = Route {
        source: hr.clone(),
        valid_section_name_refs: HashSet::default(),
        invalid_section_name_refs: HashSet::default(),
    };
    let mut recognized = false;

    for p in hr.spec.parent_refs.iter().flatten() {
        let section = match p.section_name.as_deref() {
            Some(s) if !s.is_empty() => s,
            // A parentRef without a sectionName contributes nothing.
            _ => continue,
        };

        let ref_ns = p
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| key.namespace());
        let ref_key = NsName::new(ref_ns, p.name.as_str());

        if ref_key == gw_key {
            recognized = true;
            match listeners.get_mut(section) {
                Some(l) => {
                    let accepted = find_accepted_hostnames(
                        listener_hostname(l.source.hostname.as_deref()),
                        hr.spec.hostnames.as_deref().unwrap_or_default(),
                    );
                    if accepted.is_empty() {
                        route.invalid_section_name_refs.insert(section.to_string());
                    } else {
                        route.valid_section_name_refs.insert(section.to_string());
                        l.routes.insert(key.clone());
                        l.accepted_hostnames.extend(accepted);
                    }
                }
                None => {
                    route.invalid_section_name_refs.insert(section.to_string());
                }
            }
        } else if ignored_gateways.contains_key(&ref_key) {
            // The route attaches to a Gateway we deliberately do not serve.
            recognized = true;
            route.invalid_section_name_refs.insert(section.to_string());
        }
    }

    recognized.then_some(route)
}

/// The intersection of a listener's hostname with a route's hostnames. An
/// unset listener hostname accepts every route hostname.
fn find_accepted_hostnames(listener_hostname: &str, route_hostnames: &[String]) -> Vec<String> {
    if listener_hostname.is_empty() {
        return route_hostnames.to_vec();
    }
    route_hostnames
        .iter()
        .filter(|h| h.as_str() == listener_hostname)
        .cloned()
        .collect()
}
