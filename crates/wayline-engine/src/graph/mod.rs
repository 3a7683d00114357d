//! Workflow graph model.
//!
//! A definition file deserializes into a [`WorkflowDefinition`]; validation
//! turns it into an immutable [`Workflow`] whose every edge has been checked
//! and whose conditional branches are typed. Runs only ever see validated
//! workflows.

pub mod edge;
pub mod node;
pub mod schema;
mod validate;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use wayline_core::trigger::TriggerSpec;
use wayline_core::types::{WorkflowSummary, START_NODE};

pub use edge::{Edge, EdgeKind, EdgeTarget, Transition};
pub use node::Node;
pub use schema::{StateSchema, VariableDef};

/// A workflow as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(
        rename = "createdAt",
        alias = "created_at",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
    #[serde(default)]
    pub state_schema: BTreeMap<String, VariableDef>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub progression_triggers: Vec<TriggerSpec>,
    /// Tools the host should load besides the nodes' preferred actions.
    #[serde(default)]
    pub custom_tools: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            author: None,
            created_at: None,
            state_schema: BTreeMap::new(),
            nodes: vec![],
            edges: vec![],
            progression_triggers: vec![],
            custom_tools: vec![],
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, def: VariableDef) -> Self {
        self.state_schema.insert(name.into(), def);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.progression_triggers.push(trigger);
        self
    }
}

/// A validated, immutable workflow shared by all of its runs.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author: Option<String>,
    pub created_at: Option<String>,
    schema: StateSchema,
    nodes: HashMap<String, Node>,
    node_order: Vec<String>,
    /// Outgoing transition per source node, `START` included.
    transitions: HashMap<String, Transition>,
    triggers: Vec<TriggerSpec>,
    tools: Vec<String>,
}

impl Workflow {
    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// The outgoing transition of a node. `None` means completing the node
    /// ends the run.
    pub fn transition_from(&self, node_id: &str) -> Option<&Transition> {
        self.transitions.get(node_id)
    }

    /// The transition leaving `START`.
    pub fn entry_transition(&self) -> Option<&Transition> {
        self.transitions.get(START_NODE)
    }

    pub fn triggers(&self) -> &[TriggerSpec] {
        &self.triggers
    }

    /// Tools the host loads for a run: preferred actions in node order,
    /// then custom tools, without duplicates.
    pub fn tool_set(&self) -> &[String] {
        &self.tools
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            node_count: self.nodes.len(),
            trigger_count: self.triggers.len(),
        }
    }
}
