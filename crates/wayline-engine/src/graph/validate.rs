use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use wayline_core::error::{Result, WaylineError};
use wayline_core::trigger::{TriggerAction, TriggerKind, TriggerSpec, MAX_INTERVAL_SECS};
use wayline_core::types::{END_NODE, START_NODE};

use super::edge::{Edge, EdgeKind, EdgeTarget, Transition};
use super::schema::StateSchema;
use super::{Node, Workflow, WorkflowDefinition};

impl Workflow {
    /// Validate a definition and build the workflow.
    ///
    /// Every structural problem is reported as a `Definition` error naming
    /// the workflow; nothing is deferred to execution time.
    pub fn from_definition(def: WorkflowDefinition) -> Result<Self> {
        let fail = |message: String| WaylineError::definition(def.id.clone(), message);

        check_id(&def.id).map_err(fail)?;

        let schema = StateSchema::from_defs(&def.state_schema).map_err(|e| fail(e.to_string()))?;

        let mut nodes: HashMap<String, Node> = HashMap::new();
        let mut node_order = Vec::with_capacity(def.nodes.len());
        for node in &def.nodes {
            if node.id.trim().is_empty() {
                return Err(fail("node with an empty id".to_string()));
            }
            if node.id == START_NODE || node.id == END_NODE {
                return Err(fail(format!("node id '{}' is reserved", node.id)));
            }
            if nodes.insert(node.id.clone(), node.clone()).is_some() {
                return Err(fail(format!("duplicate node id '{}'", node.id)));
            }
            node_order.push(node.id.clone());
        }

        let mut transitions: HashMap<String, Transition> = HashMap::new();
        for edge in &def.edges {
            let transition = check_edge(edge, &nodes, &schema).map_err(&fail)?;
            if transitions.insert(edge.source.clone(), transition).is_some() {
                return Err(fail(format!(
                    "node '{}' has more than one outgoing edge",
                    edge.source
                )));
            }
        }
        if !transitions.contains_key(START_NODE) {
            return Err(fail("no edge leaves START".to_string()));
        }

        for (index, trigger) in def.progression_triggers.iter().enumerate() {
            check_trigger(trigger, &schema)
                .map_err(|message| fail(format!("trigger {}: {}", index, message)))?;
        }

        for id in unreachable_nodes(&node_order, &transitions) {
            warn!(workflow = %def.id, node = %id, "Node is unreachable from START");
        }

        let mut tools: Vec<String> = Vec::new();
        let preferred = node_order
            .iter()
            .filter_map(|id| nodes.get(id))
            .flat_map(|n| n.preferred_actions.iter());
        for tool in preferred.chain(def.custom_tools.iter()) {
            if !tool.is_empty() && !tools.contains(tool) {
                tools.push(tool.clone());
            }
        }

        Ok(Self {
            name: if def.name.is_empty() {
                def.id.clone()
            } else {
                def.name
            },
            id: def.id,
            description: def.description,
            author: def.author,
            created_at: def.created_at,
            schema,
            nodes,
            node_order,
            transitions,
            triggers: def.progression_triggers,
            tools,
        })
    }
}

/// Workflow ids double as file stems.
fn check_id(id: &str) -> std::result::Result<(), String> {
    if id.trim().is_empty() {
        return Err("workflow id is empty".to_string());
    }
    if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
        return Err(format!("workflow id '{}' is not a plain name", id));
    }
    Ok(())
}

fn check_edge(
    edge: &Edge,
    nodes: &HashMap<String, Node>,
    schema: &StateSchema,
) -> std::result::Result<Transition, String> {
    let label = if edge.id.is_empty() {
        format!("edge from '{}'", edge.source)
    } else {
        format!("edge '{}'", edge.id)
    };

    if edge.source != START_NODE && !nodes.contains_key(&edge.source) {
        return Err(format!("{} leaves unknown node '{}'", label, edge.source));
    }
    for target in edge.targets() {
        if target != END_NODE && !nodes.contains_key(target) {
            return Err(format!("{} targets unknown node '{}'", label, target));
        }
    }

    match (edge.kind, &edge.target) {
        (EdgeKind::Normal, EdgeTarget::Node(target)) => Ok(Transition::Normal {
            target: target.clone(),
        }),
        (EdgeKind::Normal, EdgeTarget::Branches(_)) => {
            Err(format!("{} is normal but has a branch map target", label))
        }
        (EdgeKind::Condition, EdgeTarget::Node(_)) => {
            Err(format!("{} is a condition but has a single target", label))
        }
        (EdgeKind::Condition, EdgeTarget::Branches(map)) => {
            let state_key = edge
                .state_key
                .as_deref()
                .ok_or_else(|| format!("{} is a condition without state_key", label))?;
            let ty = schema
                .type_of(state_key)
                .ok_or_else(|| format!("{} is keyed on undeclared state '{}'", label, state_key))?;
            if !ty.is_routable() {
                return Err(format!(
                    "{} is keyed on '{}' of type {}, which cannot route",
                    label, state_key, ty
                ));
            }
            if map.is_empty() {
                return Err(format!("{} has no branches", label));
            }
            let mut branches = Vec::with_capacity(map.len());
            for (branch, target) in map {
                let value = ty.parse_branch(branch).ok_or_else(|| {
                    format!("{}: branch '{}' is not a {} value", label, branch, ty)
                })?;
                if branches.iter().any(|(existing, _)| existing == &value) {
                    return Err(format!("{}: branch '{}' is listed twice", label, branch));
                }
                branches.push((value, target.clone()));
            }
            Ok(Transition::Conditional {
                state_key: state_key.to_string(),
                branches,
            })
        }
    }
}

fn check_trigger(trigger: &TriggerSpec, schema: &StateSchema) -> std::result::Result<(), String> {
    match &trigger.kind {
        TriggerKind::TimeInterval { interval_seconds } => {
            if *interval_seconds == 0 {
                return Err("interval_seconds must be positive".to_string());
            }
            if *interval_seconds > MAX_INTERVAL_SECS {
                return Err(format!(
                    "interval_seconds {} exceeds the maximum of {}",
                    interval_seconds, MAX_INTERVAL_SECS
                ));
            }
        }
        TriggerKind::Keyword { keywords } => {
            if keywords.iter().all(|k| k.trim().is_empty()) {
                return Err("keyword trigger has no keywords".to_string());
            }
        }
        TriggerKind::StateChange { state_key } => {
            if !schema.contains(state_key) {
                return Err(format!("watches undeclared state '{}'", state_key));
            }
        }
    }

    if trigger.action == TriggerAction::UpdateState {
        if trigger.state_updates.is_empty() {
            return Err("update_state trigger has no state_updates".to_string());
        }
        schema
            .coerce_all(&trigger.state_updates)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn unreachable_nodes(order: &[String], transitions: &HashMap<String, Transition>) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([START_NODE]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        match transitions.get(id) {
            Some(Transition::Normal { target }) => queue.push_back(target),
            Some(Transition::Conditional { branches, .. }) => {
                queue.extend(branches.iter().map(|(_, target)| target.as_str()))
            }
            None => {}
        }
    }
    order
        .iter()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect()
}
