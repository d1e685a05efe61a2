use anyhow::{bail, Result};
use std::path::PathBuf;

/// Process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// The name this controller announces in GatewayClass resources,
    /// e.g. `gateway.nginx.org/nginx-gateway`.
    pub gateway_ctlr_name: String,

    /// The name of the GatewayClass resource this controller reconciles.
    pub gateway_class_name: String,

    /// Where the rendered nginx configuration is written.
    pub nginx_conf_path: PathBuf,
}

// === impl Config ===

impl Config {
    pub fn new(
        gateway_ctlr_name: String,
        gateway_class_name: String,
        nginx_conf_path: PathBuf,
    ) -> Result<Self> {
        validate_controller_name(&gateway_ctlr_name)?;
        if gateway_class_name.is_empty() {
            bail!("gatewayclass name must not be empty");
        }
        Ok(Self {
            gateway_ctlr_name,
            gateway_class_name,
            nginx_conf_path,
        })
    }
}

/// A controller name must be a domain-prefixed path, e.g.
/// `gateway.nginx.org/nginx-gateway`.
fn validate_controller_name(name: &str) -> Result<()> {
    match name.split_once('/') {
        Some((domain, path)) if !domain.is_empty() && !path.is_empty() => Ok(()),
        _ => bail!("invalid gateway controller name '{}': must be of the form <domain>/<path>", name),
    }
}
