use super::graph::Graph;
use super::service::ServiceResolver;
use crate::k8s::{HTTPRoute, HTTPRouteRulesMatches, NsName};
use anyhow::{anyhow, bail, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// The flattened proxy configuration: one virtual server per hostname,
/// ordered ascending by hostname, paths ordered ascending within a server.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Configuration {
    pub http_servers: Vec<HttpServer>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct HttpServer {
    pub hostname: String,
    pub path_rules: Vec<PathRule>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PathRule {
    pub path: String,
    pub match_rules: Vec<MatchRule>,
}

/// A back-index into an HTTPRoute's rule/match arrays, letting the renderer
/// recover the original match spec lazily.
#[derive(Clone, Debug)]
pub(crate) struct MatchRule {
    pub rule_idx: usize,
    pub match_idx: usize,
    pub source: Arc<HTTPRoute>,
}

// === impl MatchRule ===

impl MatchRule {
    /// The match this rule points at.
    pub fn spec_match(&self) -> &HTTPRouteRulesMatches {
        let rules = self
            .source
            .spec
            .rules
            .as_ref()
            .expect("match rule must index an existing rule");
        rules[self.rule_idx]
            .matches
            .as_ref()
            .expect("match rule must index an existing match")
            .get(self.match_idx)
            .expect("match rule must index an existing match")
    }
}

impl PartialEq for MatchRule {
    fn eq(&self, other: &Self) -> bool {
        // Routes are compared by identity: the generation bumps whenever the
        // spec changes, so this is enough to detect a stale configuration.
        self.rule_idx == other.rule_idx
            && self.match_idx == other.match_idx
            && self.source.metadata.namespace == other.source.metadata.namespace
            && self.source.metadata.name == other.source.metadata.name
            && self.source.metadata.generation == other.source.metadata.generation
    }
}

/// Flattens the graph into an ordered Configuration.
///
/// Pure: equal graphs produce equal configurations. If the gatewayclass is
/// absent or invalid, or no gateway won selection, the configuration is
/// empty.
pub(crate) fn build_configuration(graph: &Graph) -> Configuration {
    match graph.gateway_class.as_ref() {
        Some(gc) if gc.valid => {}
        _ => return Configuration::default(),
    }
    if graph.gateway.is_none() {
        return Configuration::default();
    }

    // hostname -> path -> match rules; BTreeMaps give the required ordering.
    let mut servers: BTreeMap<String, BTreeMap<String, Vec<MatchRule>>> = BTreeMap::new();
    let mut seen: HashSet<(String, NsName, usize, usize)> = HashSet::new();

    for l in graph.listeners.values().filter(|l| l.valid) {
        for hostname in l.accepted_hostnames.iter() {
            for key in l.routes.iter() {
                let route = match graph.routes.get(key) {
                    Some(route) => route,
                    None => continue,
                };
                let hr = &route.source;
                if !route_has_hostname(hr, hostname) {
                    continue;
                }

                for (rule_idx, rule) in hr.spec.rules.iter().flatten().enumerate() {
                    let matches = rule.matches.as_deref().unwrap_or_default();
                    for match_idx in 0..matches.len() {
                        if !seen.insert((hostname.clone(), key.clone(), rule_idx, match_idx)) {
                            continue;
                        }
                        let mr = MatchRule {
                            rule_idx,
                            match_idx,
                            source: hr.clone(),
                        };
                        let path = get_path(mr.spec_match());
                        servers
                            .entry(hostname.clone())
                            .or_default()
                            .entry(path)
                            .or_default()
                            .push(mr);
                    }
                }
            }
        }
    }

    let http_servers = servers
        .into_iter()
        .map(|(hostname, paths)| HttpServer {
            hostname,
            path_rules: paths
                .into_iter()
                .map(|(path, mut match_rules)| {
                    match_rules.sort_by(match_rule_order);
                    PathRule { path, match_rules }
                })
                .collect(),
        })
        .collect();

    Configuration { http_servers }
}

/// Match rules within a path are ordered by route age (older first), then by
/// route (namespace, name), then by position within the route.
fn match_rule_order(a: &MatchRule, b: &MatchRule) -> std::cmp::Ordering {
    let created = |mr: &MatchRule| mr.source.metadata.creation_timestamp.as_ref().map(|t| t.0);
    created(a)
        .cmp(&created(b))
        .then_with(|| {
            NsName::from_resource(a.source.as_ref()).cmp(&NsName::from_resource(b.source.as_ref()))
        })
        .then_with(|| a.rule_idx.cmp(&b.rule_idx))
        .then_with(|| a.match_idx.cmp(&b.match_idx))
}

fn route_has_hostname(hr: &HTTPRoute, hostname: &str) -> bool {
    hr.spec
        .hostnames
        .iter()
        .flatten()
        .any(|h| h.as_str() == hostname)
}

/// A missing or empty path match falls back to the root path.
fn get_path(m: &HTTPRouteRulesMatches) -> String {
    m.path
        .as_ref()
        .and_then(|p| p.value.as_deref())
        .filter(|v| !v.is_empty())
        .unwrap_or("/")
        .to_string()
}

/// Resolves the upstream address for a match rule's backend.
///
/// Only the first backendRef of the rule is considered; it must reference a
/// Service (implicitly or explicitly) and carry a port. Any validation or
/// resolution failure routes the match to the 502 stub upstream instead.
pub(crate) fn backend_address(
    mr: &MatchRule,
    resolver: &dyn ServiceResolver,
) -> Result<String> {
    let route_key = NsName::from_resource(mr.source.as_ref());

    let backend = mr
        .source
        .spec
        .rules
        .as_deref()
        .unwrap_or_default()
        .get(mr.rule_idx)
        .and_then(|rule| rule.backend_refs.as_deref())
        .and_then(|refs| refs.first())
        .ok_or_else(|| anyhow!("route {} rule {} has no backend refs", route_key, mr.rule_idx))?;

    match backend.group.as_deref() {
        None | Some("") | Some("networking.k8s.io") => {}
        Some(group) => bail!("unsupported backend group {}", group),
    }
    match backend.kind.as_deref() {
        None | Some("") | Some("Service") => {}
        Some(kind) => bail!("unsupported backend kind {}", kind),
    }

    let ns = backend
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| route_key.namespace());
    let key = NsName::new(ns, backend.name.as_str());

    let address = resolver.resolve(&key)?;

    let port = backend
        .port
        .ok_or_else(|| anyhow!("backend ref for service {} has no port", key))?;

    Ok(format!("{}:{}", address, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{Gateway, GatewayClass, GatewayListeners};
    use crate::state::graph::{GatewayClassInfo, Listener, Route};
    use crate::state::service::ResolveError;
    use chrono::TimeZone;
    use gateway_api::apis::standard::gatewayclasses::GatewayClassSpec;
    use gateway_api::apis::standard::gateways::GatewaySpec;
    use gateway_api::apis::standard::httproutes::{
        HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteRulesBackendRefs, HTTPRouteRulesMatchesPath,
        HTTPRouteSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn gateway_class_info(valid: bool) -> GatewayClassInfo {
        GatewayClassInfo {
            source: Arc::new(GatewayClass {
                metadata: ObjectMeta {
                    name: Some("nginx".to_string()),
                    ..Default::default()
                },
                spec: GatewayClassSpec::default(),
                status: None,
            }),
            valid,
            error_msg: if valid { String::new() } else { "error".to_string() },
        }
    }

    fn winner() -> Arc<Gateway> {
        Arc::new(Gateway {
            metadata: ObjectMeta {
                namespace: Some("test".to_string()),
                name: Some("gateway".to_string()),
                ..Default::default()
            },
            spec: GatewaySpec::default(),
            status: None,
        })
    }

    fn http_listener(valid: bool, routes: &[NsName], hostnames: &[&str]) -> Listener {
        Listener {
            source: GatewayListeners {
                name: "listener-80-1".to_string(),
                port: 80,
                protocol: "HTTP".to_string(),
                ..Default::default()
            },
            valid,
            routes: routes.iter().cloned().collect(),
            accepted_hostnames: hostnames.iter().map(ToString::to_string).collect(),
        }
    }

    fn route_at(ns: &str, name: &str, created_secs: i64, hostname: &str, paths: &[&str]) -> Route {
        let rules = paths
            .iter()
            .map(|p| HTTPRouteRules {
                matches: Some(vec![HTTPRouteRulesMatches {
                    path: Some(HTTPRouteRulesMatchesPath {
                        value: Some(p.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .collect();

        Route {
            source: Arc::new(HTTPRoute {
                metadata: ObjectMeta {
                    namespace: Some(ns.to_string()),
                    name: Some(name.to_string()),
                    creation_timestamp: Some(Time(
                        chrono::Utc.timestamp_opt(created_secs, 0).unwrap(),
                    )),
                    ..Default::default()
                },
                spec: HTTPRouteSpec {
                    hostnames: Some(vec![hostname.to_string()]),
                    parent_refs: Some(vec![HTTPRouteParentRefs {
                        name: "gateway".to_string(),
                        namespace: Some("test".to_string()),
                        section_name: Some("listener-80-1".to_string()),
                        ..Default::default()
                    }]),
                    rules: Some(rules),
                    ..Default::default()
                },
                status: None,
            }),
            valid_section_name_refs: ["listener-80-1".to_string()].into_iter().collect(),
            invalid_section_name_refs: Default::default(),
        }
    }

    fn graph_with(
        gateway_class: Option<GatewayClassInfo>,
        gateway: Option<Arc<Gateway>>,
        listener: Option<Listener>,
        routes: Vec<(NsName, Route)>,
    ) -> Graph {
        let mut listeners = HashMap::new();
        if let Some(l) = listener {
            listeners.insert("listener-80-1".to_string(), l);
        }
        Graph {
            gateway_class,
            gateway,
            ignored_gateways: HashMap::default(),
            listeners,
            routes: routes.into_iter().collect(),
        }
    }

    /// Extracts (path, [(route name, rule idx)]) pairs for assertions.
    fn paths_of(server: &HttpServer) -> Vec<(String, Vec<(String, usize)>)> {
        server
            .path_rules
            .iter()
            .map(|pr| {
                let rules = pr
                    .match_rules
                    .iter()
                    .map(|mr| {
                        (
                            mr.source.metadata.name.clone().unwrap_or_default(),
                            mr.rule_idx,
                        )
                    })
                    .collect();
                (pr.path.clone(), rules)
            })
            .collect()
    }

    #[test]
    fn empty_without_a_valid_gateway_class() {
        let hr1_key = NsName::new("test", "hr-1");
        let hr1 = route_at("test", "hr-1", 1, "foo.example.com", &["/"]);

        for gc in [None, Some(gateway_class_info(false))] {
            let graph = graph_with(
                gc,
                Some(winner()),
                Some(http_listener(true, &[hr1_key.clone()], &["foo.example.com"])),
                vec![(hr1_key.clone(), hr1.clone())],
            );
            assert_eq!(build_configuration(&graph), Configuration::default());
        }
    }

    #[test]
    fn empty_without_a_gateway() {
        let graph = graph_with(Some(gateway_class_info(true)), None, None, vec![]);
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn listener_with_no_routes_yields_no_servers() {
        let graph = graph_with(
            Some(gateway_class_info(true)),
            Some(winner()),
            Some(http_listener(true, &[], &[])),
            vec![],
        );
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn invalid_listeners_are_skipped() {
        let hr1_key = NsName::new("test", "hr-1");
        let graph = graph_with(
            Some(gateway_class_info(true)),
            Some(winner()),
            Some(http_listener(false, &[hr1_key.clone()], &["foo.example.com"])),
            vec![(hr1_key, route_at("test", "hr-1", 1, "foo.example.com", &["/"]))],
        );
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn servers_are_ordered_by_hostname() {
        let hr1_key = NsName::new("test", "hr-1");
        let hr2_key = NsName::new("test", "hr-2");
        let graph = graph_with(
            Some(gateway_class_info(true)),
            Some(winner()),
            Some(http_listener(
                true,
                &[hr1_key.clone(), hr2_key.clone()],
                &["foo.example.com", "bar.example.com"],
            )),
            vec![
                (hr1_key, route_at("test", "hr-1", 1, "foo.example.com", &["/"])),
                (hr2_key, route_at("test", "hr-2", 1, "bar.example.com", &["/"])),
            ],
        );

        let cfg = build_configuration(&graph);
        assert_eq!(
            cfg.http_servers
                .iter()
                .map(|s| s.hostname.as_str())
                .collect::<Vec<_>>(),
            vec!["bar.example.com", "foo.example.com"]
        );
        assert_eq!(
            paths_of(&cfg.http_servers[0]),
            vec![("/".to_string(), vec![("hr-2".to_string(), 0)])]
        );
        assert_eq!(
            paths_of(&cfg.http_servers[1]),
            vec![("/".to_string(), vec![("hr-1".to_string(), 0)])]
        );
    }

    #[test]
    fn colliding_paths_merge_in_route_age_order() {
        let hr3_key = NsName::new("test", "hr-3");
        let hr4_key = NsName::new("test", "hr-4");
        let graph = graph_with(
            Some(gateway_class_info(true)),
            Some(winner()),
            Some(http_listener(
                true,
                &[hr3_key.clone(), hr4_key.clone()],
                &["foo.example.com"],
            )),
            vec![
                (
                    hr3_key,
                    route_at("test", "hr-3", 1, "foo.example.com", &["/", "/third"]),
                ),
                (
                    hr4_key,
                    route_at("test", "hr-4", 2, "foo.example.com", &["/fourth", "/"]),
                ),
            ],
        );

        let cfg = build_configuration(&graph);
        assert_eq!(cfg.http_servers.len(), 1);
        assert_eq!(cfg.http_servers[0].hostname, "foo.example.com");
        assert_eq!(
            paths_of(&cfg.http_servers[0]),
            vec![
                (
                    "/".to_string(),
                    vec![("hr-3".to_string(), 0), ("hr-4".to_string(), 1)]
                ),
                ("/fourth".to_string(), vec![("hr-4".to_string(), 0)]),
                ("/third".to_string(), vec![("hr-3".to_string(), 1)]),
            ]
        );
    }

    #[test]
    fn equally_aged_routes_order_by_name() {
        let hr_b_key = NsName::new("test", "hr-b");
        let hr_a_key = NsName::new("test", "hr-a");
        let graph = graph_with(
            Some(gateway_class_info(true)),
            Some(winner()),
            Some(http_listener(
                true,
                &[hr_b_key.clone(), hr_a_key.clone()],
                &["foo.example.com"],
            )),
            vec![
                (hr_b_key, route_at("test", "hr-b", 5, "foo.example.com", &["/"])),
                (hr_a_key, route_at("test", "hr-a", 5, "foo.example.com", &["/"])),
            ],
        );

        let cfg = build_configuration(&graph);
        assert_eq!(
            paths_of(&cfg.http_servers[0]),
            vec![(
                "/".to_string(),
                vec![("hr-a".to_string(), 0), ("hr-b".to_string(), 0)]
            )]
        );
    }

    #[test]
    fn rebuilding_from_an_equal_graph_is_equal() {
        let hr1_key = NsName::new("test", "hr-1");
        let graph = graph_with(
            Some(gateway_class_info(true)),
            Some(winner()),
            Some(http_listener(true, &[hr1_key.clone()], &["foo.example.com"])),
            vec![(hr1_key, route_at("test", "hr-1", 1, "foo.example.com", &["/"]))],
        );

        assert_eq!(build_configuration(&graph), build_configuration(&graph));
    }

    #[test]
    fn match_rule_recovers_the_original_match() {
        let paths = ["/path-1", "/path-2", "/path-3", "/path-4"];
        let rules = paths
            .chunks(2)
            .map(|chunk| HTTPRouteRules {
                matches: Some(
                    chunk
                        .iter()
                        .map(|p| HTTPRouteRulesMatches {
                            path: Some(HTTPRouteRulesMatchesPath {
                                value: Some(p.to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            })
            .collect();
        let hr = Arc::new(HTTPRoute {
            metadata: ObjectMeta::default(),
            spec: HTTPRouteSpec {
                rules: Some(rules),
                ..Default::default()
            },
            status: None,
        });

        for (rule_idx, match_idx, expected) in
            [(0, 0, "/path-1"), (0, 1, "/path-2"), (1, 1, "/path-4")]
        {
            let mr = MatchRule {
                rule_idx,
                match_idx,
                source: hr.clone(),
            };
            assert_eq!(
                mr.spec_match().path.as_ref().and_then(|p| p.value.as_deref()),
                Some(expected)
            );
        }
    }

    #[test]
    fn missing_or_empty_paths_fall_back_to_root() {
        let cases = [
            (Some("/abc"), "/abc"),
            (Some(""), "/"),
            (None, "/"),
        ];
        for (value, expected) in cases {
            let m = HTTPRouteRulesMatches {
                path: Some(HTTPRouteRulesMatchesPath {
                    value: value.map(ToString::to_string),
                    ..Default::default()
                }),
                ..Default::default()
            };
            assert_eq!(get_path(&m), expected);
        }

        let no_path = HTTPRouteRulesMatches::default();
        assert_eq!(get_path(&no_path), "/");
    }

    // === backend resolution ===

    struct FakeResolver {
        result: Result<String, ResolveError>,
        calls: RefCell<Vec<NsName>>,
    }

    impl FakeResolver {
        fn returning(address: &str) -> Self {
            Self {
                result: Ok(address.to_string()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing(err: ResolveError) -> Self {
            Self {
                result: Err(err),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ServiceResolver for FakeResolver {
        fn resolve(&self, key: &NsName) -> Result<String, ResolveError> {
            self.calls.borrow_mut().push(key.clone());
            self.result.clone()
        }
    }

    fn backend_ref(
        group: Option<&str>,
        kind: Option<&str>,
        ns: Option<&str>,
        name: &str,
        port: Option<i32>,
    ) -> HTTPRouteRulesBackendRefs {
        HTTPRouteRulesBackendRefs {
            group: group.map(ToString::to_string),
            kind: kind.map(ToString::to_string),
            name: name.to_string(),
            namespace: ns.map(ToString::to_string),
            port,
            ..Default::default()
        }
    }

    fn match_rule_with_backends(refs: Vec<HTTPRouteRulesBackendRefs>) -> MatchRule {
        MatchRule {
            rule_idx: 0,
            match_idx: 0,
            source: Arc::new(HTTPRoute {
                metadata: ObjectMeta {
                    namespace: Some("test".to_string()),
                    name: Some("hr-1".to_string()),
                    ..Default::default()
                },
                spec: HTTPRouteSpec {
                    rules: Some(vec![HTTPRouteRules {
                        backend_refs: Some(refs),
                        ..Default::default()
                    }]),
                    ..Default::default()
                },
                status: None,
            }),
        }
    }

    #[test]
    fn resolves_an_explicit_service_backend() {
        let resolver = FakeResolver::returning("10.0.0.1");
        let mr = match_rule_with_backends(vec![backend_ref(
            Some("networking.k8s.io"),
            Some("Service"),
            Some("test"),
            "service1",
            Some(80),
        )]);

        assert_eq!(backend_address(&mr, &resolver).unwrap(), "10.0.0.1:80");
        assert_eq!(
            resolver.calls.into_inner(),
            vec![NsName::new("test", "service1")]
        );
    }

    #[test]
    fn backend_namespace_defaults_to_the_route_namespace() {
        let resolver = FakeResolver::returning("10.0.0.1");
        let mr = match_rule_with_backends(vec![backend_ref(None, None, None, "service1", Some(80))]);

        assert_eq!(backend_address(&mr, &resolver).unwrap(), "10.0.0.1:80");
        assert_eq!(
            resolver.calls.into_inner(),
            vec![NsName::new("test", "service1")]
        );
    }

    #[test]
    fn only_the_first_backend_ref_is_used() {
        let resolver = FakeResolver::returning("10.0.0.1");
        let mr = match_rule_with_backends(vec![
            backend_ref(None, None, Some("test"), "service1", Some(80)),
            backend_ref(None, None, Some("test"), "service2", Some(80)),
        ]);

        assert_eq!(backend_address(&mr, &resolver).unwrap(), "10.0.0.1:80");
        assert_eq!(
            resolver.calls.into_inner(),
            vec![NsName::new("test", "service1")]
        );
    }

    #[test]
    fn rejects_non_service_backends_without_resolving() {
        let resolver = FakeResolver::returning("10.0.0.1");
        let mr = match_rule_with_backends(vec![backend_ref(
            None,
            Some("NotService"),
            Some("test"),
            "service1",
            Some(80),
        )]);

        assert!(backend_address(&mr, &resolver).is_err());
        assert!(resolver.calls.into_inner().is_empty());
    }

    #[test]
    fn rejects_rules_without_backend_refs() {
        let resolver = FakeResolver::returning("10.0.0.1");
        let mr = match_rule_with_backends(vec![]);

        assert!(backend_address(&mr, &resolver).is_err());
        assert!(resolver.calls.into_inner().is_empty());
    }

    #[test]
    fn rejects_backends_without_a_port() {
        let resolver = FakeResolver::returning("10.0.0.1");
        let mr = match_rule_with_backends(vec![backend_ref(
            None,
            None,
            Some("test"),
            "service1",
            None,
        )]);

        assert!(backend_address(&mr, &resolver).is_err());
        // Validation order follows resolution: the resolver is still consulted.
        assert_eq!(
            resolver.calls.into_inner(),
            vec![NsName::new("test", "service1")]
        );
    }

    #[test]
    fn propagates_resolver_failures() {
        let key = NsName::new("test", "service1");
        let resolver = FakeResolver::failing(ResolveError::NotFound(key));
        let mr = match_rule_with_backends(vec![backend_ref(
            None,
            None,
            Some("test"),
            "service1",
            Some(80),
        )]);

        assert!(backend_address(&mr, &resolver).is_err());
    }
}
