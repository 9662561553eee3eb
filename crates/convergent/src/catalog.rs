//! Guest catalog - typed desired state, loaded and validated up front.
//!
//! The catalog is the only place the declared state is read. It is loaded once
//! per run into an immutable structure and passed explicitly to every
//! component; nothing re-reads or re-parses shared state mid-run.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Numeric guest identifier, stable for the guest's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GuestId(pub u32);

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for GuestId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Kind of guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    /// A golden image other guests clone from
    Template,
    /// A runnable container or VM instance
    Instance,
}

impl GuestKind {
    /// Name used in catalog files and display output.
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Template => "template",
            GuestKind::Instance => "instance",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Network block of a guest's desired configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bridge or switch the interface attaches to
    pub bridge: String,
    /// Static address in CIDR form, or None for DHCP
    #[serde(default)]
    pub address: Option<String>,
    /// Default gateway
    #[serde(default)]
    pub gateway: Option<String>,
}

/// Versioned desired-configuration payload for one guest.
///
/// The engine never interprets these fields beyond handing them to the
/// command adapter for diffing; every optional source field is an explicit
/// `Option` member rather than an untyped lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestConfig {
    /// Hostname assigned inside the guest
    pub hostname: String,
    /// CPU cores
    pub cores: u16,
    /// Memory in MiB
    pub memory_mb: u64,
    /// Root volume size in GiB
    pub disk_gb: u64,
    /// Optional network block (absent means platform default)
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    /// Named features (software capabilities) to install in the guest
    #[serde(default)]
    pub features: Vec<String>,
}

/// One declared guest: identity, desired config, and ordering relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestSpec {
    /// Unique numeric id
    pub id: GuestId,
    /// Template or instance
    pub kind: GuestKind,
    /// Desired configuration payload
    pub config: GuestConfig,
    /// Guests that must be fully converged before this one begins
    #[serde(default)]
    pub depends_on: Vec<GuestId>,
    /// Template this guest is cloned from; an implicit dependency edge
    #[serde(default)]
    pub clone_from: Option<GuestId>,
    /// Tie-break among guests with no relative dependency ordering.
    /// Lower runs first; absent means 0. Never overrides a dependency edge.
    #[serde(default)]
    pub order_hint: Option<i64>,
}

impl GuestSpec {
    /// Effective ordering hint (absent treated as 0).
    pub fn hint(&self) -> i64 {
        self.order_hint.unwrap_or(0)
    }

    /// All ids this guest depends on: explicit entries plus the clone source.
    pub fn dependency_ids(&self) -> impl Iterator<Item = GuestId> + '_ {
        self.depends_on.iter().copied().chain(self.clone_from)
    }
}

/// On-disk catalog document.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    guests: Vec<GuestSpec>,
}

/// Immutable, validated collection of guest specs.
///
/// Built fresh on every engine run; all memory of prior runs lives in the
/// target system's actual state, inspected anew each run.
#[derive(Debug, Clone)]
pub struct Catalog {
    guests: BTreeMap<GuestId, GuestSpec>,
}

impl Catalog {
    /// Load and validate a catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::CatalogNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a catalog from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Self::from_specs(file.guests)
    }

    /// Validate a list of specs into a catalog.
    ///
    /// Fails (fatally, before any execution) on duplicate ids, dangling
    /// dependency or clone references, clone sources that are not templates,
    /// and missing required config fields.
    pub fn from_specs(specs: Vec<GuestSpec>) -> Result<Self> {
        let mut guests = BTreeMap::new();
        for spec in specs {
            validate_config(&spec)?;
            let id = spec.id;
            if guests.insert(id, spec).is_some() {
                return Err(Error::DuplicateId { id });
            }
        }

        for spec in guests.values() {
            for dep in spec.dependency_ids() {
                if !guests.contains_key(&dep) {
                    return Err(Error::DanglingReference {
                        from: spec.id,
                        to: dep,
                    });
                }
            }
            if let Some(src) = spec.clone_from
                && guests[&src].kind != GuestKind::Template
            {
                return Err(Error::NotATemplate {
                    from: spec.id,
                    to: src,
                });
            }
        }

        Ok(Self { guests })
    }

    /// Look up a guest by id.
    pub fn get(&self, id: GuestId) -> Option<&GuestSpec> {
        self.guests.get(&id)
    }

    /// All guest ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = GuestId> + '_ {
        self.guests.keys().copied()
    }

    /// All guest specs, in id order.
    pub fn specs(&self) -> impl Iterator<Item = &GuestSpec> {
        self.guests.values()
    }

    /// Number of declared guests.
    pub fn len(&self) -> usize {
        self.guests.len()
    }

    /// Whether the catalog declares no guests.
    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }

    /// Spec with the feature list replaced by [`Self::effective_features`].
    ///
    /// This is what the lifecycle pipeline converges against, so a cloned
    /// guest never loses the features its template chain provides.
    pub fn resolved_spec(&self, id: GuestId) -> Option<GuestSpec> {
        let mut spec = self.guests.get(&id)?.clone();
        spec.config.features = self.effective_features(id);
        Some(spec)
    }

    /// Effective feature set for a guest: its own features unioned with those
    /// inherited through the clone chain, sorted and deduplicated.
    pub fn effective_features(&self, id: GuestId) -> Vec<String> {
        let mut features = BTreeSet::new();
        let mut cursor = Some(id);
        // Clone chains are acyclic once validation has passed, but guard
        // against revisits so this is safe to call on any catalog.
        let mut seen = BTreeSet::new();
        while let Some(current) = cursor {
            if !seen.insert(current) {
                break;
            }
            let Some(spec) = self.guests.get(&current) else {
                break;
            };
            features.extend(spec.config.features.iter().cloned());
            cursor = spec.clone_from;
        }
        features.into_iter().collect()
    }
}

fn validate_config(spec: &GuestSpec) -> Result<()> {
    let cfg = &spec.config;
    if cfg.hostname.trim().is_empty() {
        return Err(Error::config(format!("guest {}: hostname is required", spec.id)));
    }
    if cfg.cores == 0 {
        return Err(Error::config(format!("guest {}: cores must be nonzero", spec.id)));
    }
    if cfg.memory_mb == 0 {
        return Err(Error::config(format!(
            "guest {}: memory_mb must be nonzero",
            spec.id
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn spec(id: u32) -> GuestSpec {
    GuestSpec {
        id: GuestId(id),
        kind: GuestKind::Instance,
        config: GuestConfig {
            hostname: format!("guest-{id}"),
            cores: 2,
            memory_mb: 2048,
            disk_gb: 16,
            network: None,
            features: Vec::new(),
        },
        depends_on: Vec::new(),
        clone_from: None,
        order_hint: None,
    }
}
