use super::store::Store;
use crate::k8s::NsName;
use thiserror::Error;

/// Resolves a Service reference to a single cluster-IP address.
///
/// The configuration renderer depends on this seam; tests substitute a fake.
pub(crate) trait ServiceResolver {
    fn resolve(&self, key: &NsName) -> Result<String, ResolveError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub(crate) enum ResolveError {
    #[error("service {0} does not exist")]
    NotFound(NsName),

    #[error("service {0} has no cluster IP")]
    NoAddress(NsName),
}

impl ServiceResolver for Store {
    fn resolve(&self, key: &NsName) -> Result<String, ResolveError> {
        let svc = self
            .services
            .get(key)
            .ok_or_else(|| ResolveError::NotFound(key.clone()))?;

        // Headless services carry the literal "None" in clusterIP.
        svc.spec
            .as_ref()
            .and_then(|spec| spec.cluster_ip.as_deref())
            .filter(|ip| !ip.is_empty() && *ip != "None")
            .map(ToString::to_string)
            .ok_or_else(|| ResolveError::NoAddress(key.clone()))
    }
}
