//! Security profiles and materialized dispatch tables.
//!
//! A profile binds a dispatch table, a network allowlist, a journal
//! retention policy and an OS identity hint. Profiles are static for the
//! lifetime of a pipeline generation; a configuration reload produces a
//! new generation and never touches running threads.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{ListenerSpec, OrganismError};

/// Journal retention policy in force for messages under a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    RetainForever,
    PruneOnDelivery,
    RetainDays(u16),
}

/// A host:port pair a profile's handlers are allowed to reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

/// Declarative profile as supplied by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub name: String,
    /// Listener names reachable under this profile. Ignored when
    /// `allow_all` is set.
    #[serde(default)]
    pub listeners: Vec<String>,
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub network: Vec<HostPort>,
    pub journal: RetentionPolicy,
    /// OS identity hint (e.g. a dedicated unix user) for process isolation.
    pub identity: String,
}

/// A validated profile with its materialized dispatch table.
#[derive(Debug)]
pub struct Profile {
    name: String,
    table: DispatchTable,
    network: Vec<HostPort>,
    retention: RetentionPolicy,
    identity: String,
}

impl Profile {
    pub(crate) fn materialize(
        spec: ProfileSpec,
        listeners: &IndexMap<String, ListenerSpec>,
    ) -> Result<Self, OrganismError> {
        let selected: Vec<&ListenerSpec> = if spec.allow_all {
            listeners.values().collect()
        } else {
            spec.listeners
                .iter()
                .map(|name| {
                    listeners.get(name).ok_or_else(|| OrganismError::UnknownListener {
                        profile: spec.name.clone(),
                        listener: name.clone(),
                    })
                })
                .collect::<Result<_, _>>()?
        };

        let mut routes: IndexMap<String, String> = IndexMap::new();
        for listener in selected {
            for tag in &listener.payload_tags {
                if let Some(first) = routes.get(tag) {
                    return Err(OrganismError::AmbiguousRoute {
                        profile: spec.name.clone(),
                        tag: tag.clone(),
                        first: first.clone(),
                        second: listener.name.clone(),
                    });
                }
                routes.insert(tag.clone(), listener.name.clone());
            }
        }

        Ok(Self {
            name: spec.name,
            table: DispatchTable { routes },
            network: spec.network,
            retention: spec.journal,
            identity: spec.identity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn network(&self) -> &[HostPort] {
        &self.network
    }

    /// Check a host:port against the profile's network allowlist.
    pub fn network_permitted(&self, host: &str, port: u16) -> bool {
        self.network
            .iter()
            .any(|hp| hp.host == host && hp.port == port)
    }
}

/// Per-profile closed-world route map: payload tag → handler name.
///
/// There is no wildcard, no fallback and no dynamic registration. A tag
/// absent from the map has no path to any handler: structural security
/// rather than a runtime check that could be bypassed.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    routes: IndexMap<String, String>,
}

impl DispatchTable {
    /// Resolve a payload tag to its handler, if the profile routes it.
    pub fn resolve(&self, tag: &str) -> Option<&str> {
        self.routes.get(tag).map(|s| s.as_str())
    }

    pub fn permits_handler(&self, handler: &str) -> bool {
        self.routes.values().any(|h| h == handler)
    }

    /// Handler names in route order, deduplicated.
    pub fn handler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for handler in self.routes.values() {
            if !names.contains(&handler.as_str()) {
                names.push(handler);
            }
        }
        names
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// True when every route in `self` also exists, with the same handler,
    /// in `other`. This is the spawn-time monotonicity check: a child
    /// profile must be equal to or more restrictive than its parent's.
    pub fn is_subset_of(&self, other: &DispatchTable) -> bool {
        self.routes
            .iter()
            .all(|(tag, handler)| other.routes.get(tag) == Some(handler))
    }
}
