use std::fmt;

use serde::Serialize;

use pipegraph_core::types::{GraphNode, McpAccess};

/// Prefix of tool names exposed by MCP servers: `mcp__{server}__{tool}`.
pub const MCP_PREFIX: &str = "mcp__";

/// Decision for one tool call while a node is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Block { reason: String },
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => write!(f, "allow"),
            Verdict::Block { reason } => write!(f, "block: {reason}"),
        }
    }
}

/// Server segment of an MCP tool name.
pub fn mcp_server(tool_name: &str) -> Option<&str> {
    let rest = tool_name.strip_prefix(MCP_PREFIX)?;
    let (server, _) = rest.split_once("__")?;
    (!server.is_empty()).then_some(server)
}

/// Whether `node` lets the agent call `tool_name`.
pub fn gate_tool(node: &GraphNode, tool_name: &str) -> Verdict {
    if let Some(rule) = node
        .tools_blocked
        .iter()
        .find(|b| !b.is_empty() && tool_name.starts_with(b.as_str()))
    {
        return Verdict::Block {
            reason: format!("'{tool_name}' is blocked in node '{}' ({rule})", node.name),
        };
    }

    if let (Some(server), McpAccess::Only(_)) = (mcp_server(tool_name), &node.mcps_enabled) {
        if !node.mcps_enabled.allows(server) {
            return Verdict::Block {
                reason: format!(
                    "MCP server '{server}' is not enabled in node '{}'",
                    node.name
                ),
            };
        }
    }

    Verdict::Allow
}
