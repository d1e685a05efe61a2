use crate::state::{backend_address, Configuration, ServiceResolver};
use tracing::debug;

/// The always-present upstream that answers every request with 502.
pub(crate) const NGINX_502_SERVER: &str = "nginx-502-server";

const NGINX_502_SOCKET: &str = "unix:/var/lib/nginx/nginx-502-server.sock";

/// Renders the full http-block configuration for nginx.
///
/// Deterministic: equal configurations (with a resolver returning equal
/// results) produce byte-identical output.
pub(crate) fn generate(cfg: &Configuration, resolver: &dyn ServiceResolver) -> String {
    let mut out = String::new();

    // The fallback upstream for matches without a resolvable backend.
    out.push_str(&format!("upstream {} {{\n", NGINX_502_SERVER));
    out.push_str(&format!("    server {};\n", NGINX_502_SOCKET));
    out.push_str("}\n");
    out.push_str("\nserver {\n");
    out.push_str(&format!("    listen {};\n", NGINX_502_SOCKET));
    out.push_str("    return 502;\n");
    out.push_str("}\n");

    for server in cfg.http_servers.iter() {
        out.push_str("\nserver {\n");
        out.push_str(&format!("    server_name {};\n", server.hostname));

        for rule in server.path_rules.iter() {
            // Match rules are ordered by priority; the winning backend for a
            // path is its first rule's.
            let address = rule.match_rules.first().and_then(|mr| {
                backend_address(mr, resolver)
                    .map_err(|error| {
                        debug!(
                            %error,
                            hostname = %server.hostname,
                            path = %rule.path,
                            "Routing to the 502 upstream",
                        );
                    })
                    .ok()
            });

            out.push_str(&format!("\n    location {} {{\n", rule.path));
            out.push_str(&format!(
                "        proxy_pass {};\n",
                generate_proxy_pass(address.as_deref())
            ));
            out.push_str("    }\n");
        }

        out.push_str("}\n");
    }

    out
}

fn generate_proxy_pass(address: Option<&str>) -> String {
    match address {
        Some(addr) => format!("http://{}", addr),
        None => format!("http://{}", NGINX_502_SERVER),
    }
}
