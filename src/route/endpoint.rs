//! A single backend instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Version marker attached to route updates by the control plane.
///
/// When two updates race for the same instance id, the one with the newer
/// tag wins; an update carrying the same guid and an older index is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModificationTag {
    pub guid: String,
    pub index: u64,
}

impl ModificationTag {
    /// Whether `other` supersedes this tag.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        if self.guid != other.guid {
            return true;
        }
        other.index > self.index
    }
}

/// One backend instance serving a route.
///
/// Identity attributes are immutable once constructed; the registry replaces
/// the whole endpoint on updates. The active connection counter is the only
/// mutable state and feeds the least-connections strategy.
pub struct Endpoint {
    /// Application this instance belongs to.
    pub application_id: String,
    pub host: String,
    pub port: u16,
    /// Stable per-instance identifier, used as the sticky-session value.
    pub private_instance_id: String,
    /// Canonical index of the instance within its application.
    pub private_instance_index: String,
    /// Freeform tags; the `component` tag is significant for metrics.
    pub tags: HashMap<String, String>,
    /// Seconds after which a non-refreshed route is considered stale.
    pub stale_threshold_secs: u64,
    /// HTTPS middlebox interposed in front of this route, if any.
    pub route_service_url: Option<String>,
    pub modification_tag: ModificationTag,

    active_connections: AtomicUsize,
}

impl Endpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        application_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        private_instance_id: impl Into<String>,
        private_instance_index: impl Into<String>,
        tags: HashMap<String, String>,
        stale_threshold_secs: u64,
        route_service_url: Option<String>,
        modification_tag: ModificationTag,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            host: host.into(),
            port,
            private_instance_id: private_instance_id.into(),
            private_instance_index: private_instance_index.into(),
            tags,
            stale_threshold_secs,
            route_service_url,
            modification_tag,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// `host:port` form used as the outbound authority.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The `component` tag, when present and non-empty.
    pub fn component(&self) -> Option<&str> {
        self.tags.get("component").map(String::as_str).filter(|c| !c.is_empty())
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("application_id", &self.application_id)
            .field("address", &self.address())
            .field("private_instance_id", &self.private_instance_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_joins_host_and_port() {
        let e = Endpoint::new(
            "app-1",
            "10.0.0.5",
            61001,
            "instance-a",
            "0",
            HashMap::new(),
            120,
            None,
            ModificationTag::default(),
        );
        assert_eq!(e.address(), "10.0.0.5:61001");
    }

    #[test]
    fn component_tag_ignores_empty_values() {
        let mut tags = HashMap::new();
        tags.insert("component".to_string(), String::new());
        let e = Endpoint::new(
            "app-1",
            "10.0.0.5",
            61001,
            "instance-a",
            "0",
            tags,
            120,
            None,
            ModificationTag::default(),
        );
        assert_eq!(e.component(), None);
    }

    #[test]
    fn modification_tag_ordering() {
        let old = ModificationTag { guid: "g1".into(), index: 2 };
        let newer = ModificationTag { guid: "g1".into(), index: 3 };
        let other_guid = ModificationTag { guid: "g2".into(), index: 0 };

        assert!(old.succeeded_by(&newer));
        assert!(!newer.succeeded_by(&old));
        assert!(old.succeeded_by(&other_guid));
    }
}
