use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Visit cap applied to nodes that do not carry their own `max_visits`.
pub const DEFAULT_MAX_VISITS: u32 = 10;

/// Definition format version written by this crate.
pub const FORMAT_VERSION: &str = "2.0.0";

/// The only accepted value of the metadata `type` tag.
pub const GRAPH_TYPE: &str = "graph";

/// Wildcard entry in `mcps_enabled`.
pub const MCP_WILDCARD: &str = "*";

/// Identifying information for a graph. Immutable once defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Supporting agent definitions the external CLI needs while this graph runs.
    #[serde(default)]
    pub required_agents: Vec<String>,
    /// MCP servers the graph expects to be registered.
    #[serde(default)]
    pub required_mcps: Vec<String>,
}

impl Default for GraphMetadata {
    fn default() -> Self {
        Self {
            name: "unnamed".to_string(),
            description: None,
            version: FORMAT_VERSION.to_string(),
            kind: GRAPH_TYPE.to_string(),
            required_agents: Vec::new(),
            required_mcps: Vec::new(),
        }
    }
}

/// Which MCP servers a node leaves enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum McpAccess {
    /// Every server (`"*"` or `all` in a definition).
    #[default]
    All,
    /// Only the named servers.
    Only(Vec<String>),
}

impl McpAccess {
    /// Build from a definition list; any wildcard entry widens to `All`.
    pub fn from_names(names: Vec<String>) -> Self {
        if names
            .iter()
            .any(|n| n == MCP_WILDCARD || n.eq_ignore_ascii_case("all"))
        {
            McpAccess::All
        } else {
            McpAccess::Only(names)
        }
    }

    pub fn allows(&self, server: &str) -> bool {
        match self {
            McpAccess::All => true,
            McpAccess::Only(names) => names.iter().any(|n| n == server),
        }
    }

    pub fn names(&self) -> Vec<String> {
        match self {
            McpAccess::All => vec![MCP_WILDCARD.to_string()],
            McpAccess::Only(names) => names.clone(),
        }
    }
}

impl Serialize for McpAccess {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

impl<'de> Deserialize<'de> for McpAccess {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<String>::deserialize(deserializer).map(McpAccess::from_names)
    }
}

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mcps_enabled: McpAccess,
    #[serde(default)]
    pub tools_blocked: Vec<String>,
    /// Prompt fragment injected while this node is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_injection: Option<String>,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub is_end: bool,
    /// Per-node visit cap. `None` (or 0) defers to the state default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_visits: Option<u32>,
    /// Model override for the agent while this node is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mcps_enabled: McpAccess::All,
            tools_blocked: Vec::new(),
            prompt_injection: None,
            is_start: false,
            is_end: false,
            max_visits: None,
            model: None,
        }
    }

    /// The cap that applies to this node given a state-level default.
    pub fn effective_max_visits(&self, default_max: u32) -> u32 {
        match self.max_visits {
            Some(max) if max > 0 => max,
            _ => default_max,
        }
    }
}

/// Trigger that makes an edge fire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Fires when a tool whose name starts with `tool` is used.
    Tool { tool: String },
    /// Fires when observed text contains any of the phrases.
    Phrase { phrases: Vec<String> },
    /// Unconditional.
    #[default]
    Always,
    /// Fallback when no tool or phrase edge matches.
    Default,
}

impl EdgeCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            EdgeCondition::Tool { .. } => "tool",
            EdgeCondition::Phrase { .. } => "phrase",
            EdgeCondition::Always => "always",
            EdgeCondition::Default => "default",
        }
    }
}

/// A directed, conditioned transition between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: EdgeCondition,
    /// Lower fires first.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

pub fn default_priority() -> i32 {
    1
}

impl GraphEdge {
    /// Create an unconditional edge.
    pub fn always(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Always,
            priority: default_priority(),
        }
    }

    /// Create an edge that fires on a tool-name prefix.
    pub fn on_tool(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            condition: EdgeCondition::Tool { tool: tool.into() },
            ..Self::always(id, from, to)
        }
    }

    /// Create an edge that fires on any of the given phrases.
    pub fn on_phrase<I, S>(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        phrases: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            condition: EdgeCondition::Phrase {
                phrases: phrases.into_iter().map(Into::into).collect(),
            },
            ..Self::always(id, from, to)
        }
    }

    /// Create a fallback edge.
    pub fn fallback(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            condition: EdgeCondition::Default,
            ..Self::always(id, from, to)
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A complete pipeline definition: metadata plus ordered nodes and edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineGraph {
    pub metadata: GraphMetadata,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl PipelineGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Display name of a node, falling back to the raw id.
    pub fn node_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.node(id).map(|n| n.name.as_str()).unwrap_or(id)
    }

    /// The first node flagged `is_start`, or the first node defined.
    pub fn start_node(&self) -> Option<&GraphNode> {
        self.nodes
            .iter()
            .find(|n| n.is_start)
            .or_else(|| self.nodes.first())
    }

    /// Edges leaving `node_id`, by priority then declaration order.
    pub fn outgoing(&self, node_id: &str) -> Vec<&GraphEdge> {
        let mut edges: Vec<&GraphEdge> = self.edges.iter().filter(|e| e.from == node_id).collect();
        // sort_by_key is stable, which keeps declaration order on ties
        edges.sort_by_key(|e| e.priority);
        edges
    }
}

/// One recorded move through the graph. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub from_node: Option<String>,
    pub to_node: String,
    /// `None` for activations, resets and manual jumps.
    pub edge_id: Option<String>,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

/// Persisted runtime state of one project's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphState {
    /// Only the first entry is meaningful today.
    pub current_nodes: Vec<String>,
    pub node_visits: BTreeMap<String, u32>,
    pub execution_path: Vec<PathEntry>,
    pub active_graph: Option<String>,
    pub max_visits_default: u32,
    pub total_transitions: u64,
    #[serde(with = "timestamp::option")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl Default for GraphState {
    fn default() -> Self {
        Self {
            current_nodes: Vec::new(),
            node_visits: BTreeMap::new(),
            execution_path: Vec::new(),
            active_graph: None,
            max_visits_default: DEFAULT_MAX_VISITS,
            total_transitions: 0,
            last_activity: None,
        }
    }
}

impl GraphState {
    pub fn current_node(&self) -> Option<&str> {
        self.current_nodes.first().map(String::as_str)
    }

    pub fn visits(&self, node_id: &str) -> u32 {
        self.node_visits.get(node_id).copied().unwrap_or(0)
    }

    /// Append a path entry and move onto `to_node`, counting the visit.
    pub fn record_transition(
        &mut self,
        to_node: &str,
        edge_id: Option<&str>,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> PathEntry {
        let entry = PathEntry {
            from_node: self.current_node().map(str::to_string),
            to_node: to_node.to_string(),
            edge_id: edge_id.map(str::to_string),
            timestamp: at,
            reason: reason.into(),
        };
        self.execution_path.push(entry.clone());
        *self.node_visits.entry(to_node.to_string()).or_insert(0) += 1;
        self.current_nodes = vec![to_node.to_string()];
        self.total_transitions += 1;
        self.last_activity = Some(at);
        entry
    }
}

/// RFC 3339 timestamps that also accept naive local ISO-8601 values.
pub mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'"))),
            }
        }
    }
}
