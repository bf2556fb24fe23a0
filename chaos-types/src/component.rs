//! Static cluster model: components, the hosts they live on, and selectors.
//!
//! The topology is created once from configuration and never mutated by the
//! chaos engine. Selectors use the familiar `*` / `.tag` / `#id` syntax.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// What role a component plays in the cluster under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Control-plane node.
    Controller,
    /// Router / edge node.
    Router,
    /// Application hosted behind the fabric (tunneler, SDK host).
    HostedApp,
}

impl ComponentKind {
    /// The tag every component of this kind implicitly carries.
    pub fn tag(&self) -> &'static str {
        match self {
            ComponentKind::Controller => "ctrl",
            ComponentKind::Router => "router",
            ComponentKind::HostedApp => "host",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Controller => write!(f, "controller"),
            ComponentKind::Router => write!(f, "router"),
            ComponentKind::HostedApp => write!(f, "hosted app"),
        }
    }
}

/// Machine a component runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Host identifier.
    pub id: String,
    /// Address reachable over SSH.
    pub address: String,
    /// SSH username.
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_user() -> String {
    "ubuntu".to_string()
}

/// Shell commands used to drive a component's process on its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCommands {
    /// Start the process.
    pub start: String,
    /// Stop the process.
    pub stop: String,
    /// Exit 0 iff the process is running.
    pub status: String,
}

/// How the component's process can be controlled, if at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Runtime {
    /// Process on the host, driven through SSH commands.
    Ssh(LifecycleCommands),
    /// Docker container on the host.
    Docker {
        /// Container name.
        container: String,
    },
    /// No lifecycle control available.
    #[default]
    Unmanaged,
}

/// A named member of the cluster under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Stable identifier, unique within the topology.
    pub id: String,
    /// Role of the component.
    pub kind: ComponentKind,
    /// Extra selection tags (the kind tag is implied).
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Owning host.
    pub host: Host,
    /// Process control.
    #[serde(default)]
    pub runtime: Runtime,
    /// Edge management REST base URL (controllers only).
    #[serde(default)]
    pub edge_url: Option<String>,
    /// Management channel address `host:port` (controllers only).
    #[serde(default)]
    pub mgmt_address: Option<String>,
}

impl Component {
    /// Create a component with no extra tags and no runtime.
    pub fn new(id: &str, kind: ComponentKind, host: Host) -> Self {
        Self {
            id: id.to_string(),
            kind,
            tags: BTreeSet::new(),
            host,
            runtime: Runtime::Unmanaged,
            edge_url: None,
            mgmt_address: None,
        }
    }

    /// Add a selection tag.
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    /// Set the runtime.
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set the controller endpoints.
    pub fn with_endpoints(mut self, edge_url: &str, mgmt_address: &str) -> Self {
        self.edge_url = Some(edge_url.to_string());
        self.mgmt_address = Some(mgmt_address.to_string());
        self
    }

    /// True if the component carries `tag`, explicitly or through its kind.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.kind.tag() == tag || self.tags.contains(tag)
    }

    /// True if the component is picked by `selector`.
    pub fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::All => true,
            Selector::Tag(tag) => self.has_tag(tag),
            Selector::Id(id) => &self.id == id,
        }
    }
}

/// Tag-based component selector.
///
/// `*` selects everything, `.tag` selects by tag, `#id` selects one component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Selector {
    /// Every component.
    All,
    /// Components carrying a tag.
    Tag(String),
    /// The component with this id.
    Id(String),
}

impl FromStr for Selector {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| WireError::InvalidSelector {
            selector: s.to_string(),
            reason,
        };
        let s = s.trim();
        if s == "*" {
            return Ok(Selector::All);
        }
        let (prefix, rest) = s.split_at(s.chars().next().map_or(0, char::len_utf8));
        if rest.is_empty() {
            return Err(invalid("selector must be '*', '.tag' or '#id'"));
        }
        match prefix {
            "." => Ok(Selector::Tag(rest.to_string())),
            "#" => Ok(Selector::Id(rest.to_string())),
            _ => Err(invalid("selector must start with '.' or '#'")),
        }
    }
}

impl TryFrom<String> for Selector {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Selector> for String {
    fn from(value: Selector) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => write!(f, "*"),
            Selector::Tag(tag) => write!(f, ".{}", tag),
            Selector::Id(id) => write!(f, "#{}", id),
        }
    }
}

/// The static set of components in the cluster under test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    components: Vec<Component>,
}

impl Topology {
    /// Build a topology, rejecting duplicate component ids.
    pub fn new(components: Vec<Component>) -> Result<Self, WireError> {
        let mut seen = BTreeSet::new();
        for c in &components {
            if !seen.insert(c.id.as_str()) {
                return Err(WireError::DuplicateComponent(c.id.clone()));
            }
        }
        Ok(Self { components })
    }

    /// All components matching `selector`, in topology order.
    pub fn select(&self, selector: &Selector) -> Vec<Component> {
        self.components
            .iter()
            .filter(|c| c.matches(selector))
            .cloned()
            .collect()
    }

    /// Look up a component by id.
    pub fn get(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Iterate over all components.
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True if there are no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
