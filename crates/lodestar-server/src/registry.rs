//! Resource kind registry.
//!
//! Maps a gRPC method path (`"/lodestar.v1.AgentCommandService/Create"`)
//! to the [`ResourceKind`] declared on the service through the
//! `lodestar.v1.api_resource_kind` service option. Reading the option from
//! the descriptor set means a controller can never claim the wrong kind by
//! copy-paste: the kind lives in one place, next to the service
//! definition.

use std::collections::HashMap;
use std::sync::RwLock;

use prost_reflect::{DescriptorPool, Value};
use tracing::{debug, warn};

use lodestar_proto::v1::ResourceKind;
use lodestar_proto::{API_RESOURCE_KIND_EXTENSION, FILE_DESCRIPTOR_SET};

/// Lazily caching service-name → kind registry.
pub struct KindRegistry {
    pool: DescriptorPool,
    cache: RwLock<HashMap<String, ResourceKind>>,
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindRegistry").finish_non_exhaustive()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KindRegistry {
    /// Build a registry over the compiled-in descriptor set.
    ///
    /// # Panics
    ///
    /// Never in practice: the descriptor set is generated by this crate's
    /// own build.
    #[must_use]
    pub fn new() -> Self {
        let pool = DescriptorPool::decode(FILE_DESCRIPTOR_SET)
            .unwrap_or_else(|e| panic!("embedded descriptor set is invalid: {e}"));
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the kind for a full gRPC method path.
    ///
    /// Unknown services and services without the option yield
    /// [`ResourceKind::Unspecified`].
    pub fn kind_for_method(&self, path: &str) -> ResourceKind {
        let Some(service) = service_name(path) else {
            return ResourceKind::Unspecified;
        };
        self.kind_for_service(service)
    }

    /// Resolve the kind for a fully qualified service name.
    pub fn kind_for_service(&self, service: &str) -> ResourceKind {
        if let Ok(cache) = self.cache.read()
            && let Some(kind) = cache.get(service)
        {
            return *kind;
        }

        let kind = self.lookup(service);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(service.to_owned(), kind);
        }
        debug!(service, kind = kind.kind_key(), "kind registry cache filled");
        kind
    }

    fn lookup(&self, service: &str) -> ResourceKind {
        let Some(descriptor) = self.pool.get_service_by_name(service) else {
            warn!(service, "unknown service in kind lookup");
            return ResourceKind::Unspecified;
        };
        let Some(extension) = self.pool.get_extension_by_name(API_RESOURCE_KIND_EXTENSION) else {
            warn!("api_resource_kind extension missing from descriptor set");
            return ResourceKind::Unspecified;
        };

        let options = descriptor.options();
        let value = options.get_extension(&extension);
        match value.as_ref() {
            Value::EnumNumber(number) => {
                ResourceKind::try_from(*number).unwrap_or(ResourceKind::Unspecified)
            }
            _ => ResourceKind::Unspecified,
        }
    }
}

/// Extract `"package.Service"` from `"/package.Service/Method"`.
fn service_name(path: &str) -> Option<&str> {
    let mut parts = path.strip_prefix('/')?.splitn(2, '/');
    let service = parts.next()?;
    if service.is_empty() { None } else { Some(service) }
}
