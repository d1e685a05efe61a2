use super::{Clock, GatewayClassStatus, GatewayStatus, RouteStatus, Statuses};
use crate::k8s::{Gateway, GatewayClass, HTTPRoute, NsName};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Api, Patch, PatchParams};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes a status set back to the cluster. Idempotent on equal inputs.
pub(crate) trait StatusWriter {
    async fn update(&self, statuses: &Statuses) -> Result<()>;
}

/// Patches the status subresource of every resource named in a status set.
///
/// Failures are logged per resource; the first failure is reported to the
/// caller after every patch has been attempted.
pub(crate) struct Updater {
    client: kube::Client,
    gateway_ctlr_name: String,
    clock: Arc<dyn Clock>,
}

// === impl Updater ===

impl Updater {
    pub fn new(client: kube::Client, gateway_ctlr_name: String, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            gateway_ctlr_name,
            clock,
        }
    }

    async fn update_gateway_class(&self, gc: &GatewayClassStatus) -> Result<()> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        let patch = gateway_class_patch(gc, self.clock.now());
        api.patch_status(&gc.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to patch GatewayClass {}", gc.name))?;
        Ok(())
    }

    async fn update_gateway(&self, gw: &GatewayStatus) -> Result<()> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), gw.key.namespace());
        let patch = gateway_patch(gw, self.clock.now());
        api.patch_status(gw.key.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to patch Gateway {}", gw.key))?;
        Ok(())
    }

    async fn update_ignored_gateway(&self, key: &NsName, generation: Option<i64>) -> Result<()> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), key.namespace());
        let patch = ignored_gateway_patch(generation, self.clock.now());
        api.patch_status(key.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to patch ignored Gateway {}", key))?;
        Ok(())
    }

    async fn update_route(&self, key: &NsName, rs: &RouteStatus) -> Result<()> {
        let api: Api<HTTPRoute> = Api::namespaced(self.client.clone(), key.namespace());
        let patch = route_patch(rs, &self.gateway_ctlr_name, self.clock.now());
        api.patch_status(key.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to patch HTTPRoute {}", key))?;
        Ok(())
    }
}

impl StatusWriter for Updater {
    async fn update(&self, statuses: &Statuses) -> Result<()> {
        let mut result = Ok(());

        if let Some(gc) = statuses.gateway_class.as_ref() {
            debug!(name = %gc.name, "Updating GatewayClass status");
            if let Err(error) = self.update_gateway_class(gc).await {
                warn!(%error, "Failed to update GatewayClass status");
                result = Err(error);
            }
        }

        if let Some(gw) = statuses.gateway.as_ref() {
            debug!(key = %gw.key, "Updating Gateway status");
            if let Err(error) = self.update_gateway(gw).await {
                warn!(%error, "Failed to update Gateway status");
                result = Err(error);
            }
        }

        for (key, status) in statuses.ignored_gateways.iter() {
            debug!(%key, "Updating ignored Gateway status");
            if let Err(error) = self.update_ignored_gateway(key, status.generation).await {
                warn!(%error, "Failed to update ignored Gateway status");
                result = Err(error);
            }
        }

        for (key, status) in statuses.http_routes.iter() {
            debug!(%key, "Updating HTTPRoute status");
            if let Err(error) = self.update_route(key, status).await {
                warn!(%error, "Failed to update HTTPRoute status");
                result = Err(error);
            }
        }

        result
    }
}

fn condition(
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> Value {
    json!({
        "type": type_,
        "status": if status { "True" } else { "False" },
        "reason": reason,
        "message": message,
        "observedGeneration": observed_generation.unwrap_or_default(),
        "lastTransitionTime": now.to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

fn gateway_class_patch(gc: &GatewayClassStatus, now: DateTime<Utc>) -> Value {
    let reason = if gc.accepted { "Accepted" } else { "Invalid" };
    json!({
        "status": {
            "conditions": [condition(
                "Accepted",
                gc.accepted,
                reason,
                &gc.message,
                gc.generation,
                now,
            )],
        }
    })
}

fn gateway_patch(gw: &GatewayStatus, now: DateTime<Utc>) -> Value {
    let listeners = gw
        .listeners
        .iter()
        .map(|(name, l)| {
            let (reason, message) = if l.ready {
                ("Ready", "Listener is ready")
            } else {
                ("Invalid", "Listener is invalid")
            };
            json!({
                "name": name,
                "conditions": [condition("Ready", l.ready, reason, message, gw.generation, now)],
            })
        })
        .collect::<Vec<_>>();

    json!({ "status": { "listeners": listeners } })
}

fn ignored_gateway_patch(generation: Option<i64>, now: DateTime<Utc>) -> Value {
    json!({
        "status": {
            "conditions": [condition(
                "Scheduled",
                false,
                "Ignored",
                "Gateway is ignored: the controller reconciles an older Gateway",
                generation,
                now,
            )],
        }
    })
}

fn route_patch(rs: &RouteStatus, gateway_ctlr_name: &str, now: DateTime<Utc>) -> Value {
    let parents = rs
        .parents
        .iter()
        .map(|p| {
            let (reason, message) = if p.accepted {
                ("Accepted", "Route is accepted")
            } else {
                ("Invalid", "Listener is not found for the parent ref")
            };
            json!({
                "parentRef": {
                    "group": "gateway.networking.k8s.io",
                    "kind": "Gateway",
                    "namespace": p.gateway.namespace(),
                    "name": p.gateway.name(),
                    "sectionName": p.section_name,
                },
                "controllerName": gateway_ctlr_name,
                "conditions": [condition(
                    "Accepted",
                    p.accepted,
                    reason,
                    message,
                    rs.generation,
                    now,
                )],
            })
        })
        .collect::<Vec<_>>();

    json!({ "status": { "parents": parents } })
}
