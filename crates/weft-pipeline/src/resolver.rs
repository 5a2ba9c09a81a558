//! Profile resolver — the single source of structural security.
//!
//! Backed by the organism's materialized dispatch tables. Closed world:
//! no wildcard, no fallback, no dynamic registration. A tag absent from a
//! profile's table has no code path to any handler.

use indexmap::IndexMap;
use weft_organism::{DispatchTable, HostPort, Organism, RetentionPolicy};

/// Immutable view over per-profile dispatch tables, retention policies
/// and network allowlists.
#[derive(Debug)]
pub struct ProfileResolver {
    tables: IndexMap<String, DispatchTable>,
    retention: IndexMap<String, RetentionPolicy>,
    network: IndexMap<String, Vec<HostPort>>,
}

impl ProfileResolver {
    pub fn from_organism(organism: &Organism) -> Self {
        let mut tables = IndexMap::new();
        let mut retention = IndexMap::new();
        let mut network = IndexMap::new();
        for profile in organism.profiles() {
            tables.insert(profile.name().to_string(), profile.dispatch_table().clone());
            retention.insert(profile.name().to_string(), profile.retention());
            network.insert(profile.name().to_string(), profile.network().to_vec());
        }
        Self {
            tables,
            retention,
            network,
        }
    }

    pub fn knows(&self, profile: &str) -> bool {
        self.tables.contains_key(profile)
    }

    /// Resolve a payload tag under a profile. `None` means the route does
    /// not exist, structurally, not as a denied permission.
    pub fn resolve(&self, profile: &str, tag: &str) -> Option<&str> {
        self.tables.get(profile)?.resolve(tag)
    }

    pub fn is_permitted(&self, profile: &str, handler: &str) -> bool {
        self.tables
            .get(profile)
            .map(|t| t.permits_handler(handler))
            .unwrap_or(false)
    }

    pub fn retention(&self, profile: &str) -> Option<RetentionPolicy> {
        self.retention.get(profile).copied()
    }

    pub fn table(&self, profile: &str) -> Option<&DispatchTable> {
        self.tables.get(profile)
    }

    /// Handler names reachable under a profile, for router masking.
    pub fn permitted_handlers(&self, profile: &str) -> Vec<&str> {
        self.tables
            .get(profile)
            .map(|t| t.handler_names())
            .unwrap_or_default()
    }

    /// Check a host:port against a profile's network allowlist. Unknown
    /// profiles and empty allowlists both deny.
    pub fn network_permitted(&self, profile: &str, host: &str, port: u16) -> bool {
        self.network
            .get(profile)
            .map(|list| list.iter().any(|hp| hp.host == host && hp.port == port))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap as Map;
    use weft_organism::{ListenerSpec, OrganismSpec, ProfileSpec};

    fn organism() -> Organism {
        let listener = |name: &str, tag: &str| ListenerSpec {
            name: name.into(),
            payload_tags: vec![tag.into()],
            description: name.into(),
            semantic_description: None,
            request_schema: None,
            response_schema: None,
            peers: vec![],
            spawn_tags: vec![],
            agent: None,
        };
        Organism::build(OrganismSpec {
            name: "resolver-test".into(),
            prompts: Map::new(),
            listeners: vec![
                listener("file-read", "FileReadRequest"),
                listener("file-write", "FileWriteRequest"),
            ],
            profiles: vec![
                ProfileSpec {
                    name: "coding".into(),
                    listeners: vec!["file-read".into(), "file-write".into()],
                    allow_all: false,
                    network: vec![weft_organism::HostPort {
                        host: "api.example.com".into(),
                        port: 443,
                    }],
                    journal: RetentionPolicy::RetainDays(90),
                    identity: "weft-coding".into(),
                },
                ProfileSpec {
                    name: "researcher".into(),
                    listeners: vec!["file-read".into()],
                    allow_all: false,
                    network: vec![],
                    journal: RetentionPolicy::PruneOnDelivery,
                    identity: "weft-researcher".into(),
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn resolve_is_closed_world() {
        let resolver = ProfileResolver::from_organism(&organism());
        assert_eq!(
            resolver.resolve("coding", "FileWriteRequest"),
            Some("file-write")
        );
        assert_eq!(resolver.resolve("researcher", "FileWriteRequest"), None);
        assert_eq!(resolver.resolve("ghost", "FileReadRequest"), None);
        assert!(!resolver.knows("ghost"));
    }

    #[test]
    fn permitted_handlers_follow_the_table() {
        let resolver = ProfileResolver::from_organism(&organism());
        assert!(resolver.is_permitted("coding", "file-write"));
        assert!(!resolver.is_permitted("researcher", "file-write"));
        assert_eq!(resolver.permitted_handlers("researcher"), vec!["file-read"]);
    }

    #[test]
    fn network_allowlist_is_closed_by_default() {
        let resolver = ProfileResolver::from_organism(&organism());
        assert!(resolver.network_permitted("coding", "api.example.com", 443));
        assert!(!resolver.network_permitted("coding", "api.example.com", 80));
        assert!(!resolver.network_permitted("researcher", "api.example.com", 443));
        assert!(!resolver.network_permitted("ghost", "api.example.com", 443));
    }

    #[test]
    fn retention_comes_from_the_profile() {
        let resolver = ProfileResolver::from_organism(&organism());
        assert_eq!(
            resolver.retention("coding"),
            Some(RetentionPolicy::RetainDays(90))
        );
        assert_eq!(
            resolver.retention("researcher"),
            Some(RetentionPolicy::PruneOnDelivery)
        );
        assert_eq!(resolver.retention("ghost"), None);
    }
}
