//! Edge validation: cycle prevention and pluggable connection rules.
//!
//! Validation is a pure function of the current rendered graph and is run
//! fresh on every connection attempt.

use std::collections::{HashMap, HashSet};

use weft_types::{Connection, Edge, Node, NodeId};

/// Upper bound on nodes visited by one cycle check. A graph this large is
/// rejected rather than walked.
pub const MAX_CYCLE_VISITS: usize = 100_000;

/// Why a proposed edge was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    SelfLoop,
    MissingEndpoint(NodeId),
    /// The connection policy refused this source/target pair.
    Incompatible { source: NodeId, target: NodeId },
    /// The edge would close a directed cycle.
    Cycle,
    /// The cycle check exceeded [`MAX_CYCLE_VISITS`].
    TooLarge,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::SelfLoop => write!(f, "a node cannot connect to itself"),
            Rejection::MissingEndpoint(id) => write!(f, "node {id} does not exist"),
            Rejection::Incompatible { source, target } => {
                write!(f, "{source} cannot connect to {target}")
            }
            Rejection::Cycle => write!(f, "connection would create a cycle"),
            Rejection::TooLarge => write!(f, "graph too large to validate"),
        }
    }
}

/// Graph-semantic connection rules supplied by the host application
/// (e.g. which node types may feed which).
pub trait ConnectionPolicy: Send {
    fn allows(&self, source: &Node, target: &Node) -> bool;
}

/// Accepts every pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl ConnectionPolicy for AllowAll {
    fn allows(&self, _source: &Node, _target: &Node) -> bool {
        true
    }
}

impl<F> ConnectionPolicy for F
where
    F: Fn(&Node, &Node) -> bool + Send,
{
    fn allows(&self, source: &Node, target: &Node) -> bool {
        self(source, target)
    }
}

/// Whether `to` is reachable from `from` following edge direction.
///
/// Iterative DFS with a visited set; gives up with [`Rejection::TooLarge`]
/// after [`MAX_CYCLE_VISITS`] nodes.
pub fn reaches(edges: &[Edge], from: &NodeId, to: &NodeId) -> Result<bool, Rejection> {
    let mut outgoing: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    for edge in edges {
        outgoing.entry(&edge.source).or_default().push(&edge.target);
    }

    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut stack = vec![from];
    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        if visited.len() > MAX_CYCLE_VISITS {
            return Err(Rejection::TooLarge);
        }
        for next in outgoing.get(current).into_iter().flatten() {
            if *next == to {
                return Ok(true);
            }
            stack.push(*next);
        }
    }
    Ok(false)
}

/// Validate a proposed edge against the current graph.
pub fn validate_connection(
    nodes: &[Node],
    edges: &[Edge],
    connection: &Connection,
    policy: &dyn ConnectionPolicy,
) -> Result<(), Rejection> {
    if connection.source == connection.target {
        return Err(Rejection::SelfLoop);
    }
    let find = |id: &NodeId| {
        nodes
            .iter()
            .find(|n| &n.id == id)
            .ok_or_else(|| Rejection::MissingEndpoint(id.clone()))
    };
    let source = find(&connection.source)?;
    let target = find(&connection.target)?;

    if !policy.allows(source, target) {
        return Err(Rejection::Incompatible {
            source: source.id.clone(),
            target: target.id.clone(),
        });
    }
    // Adding source → target closes a cycle iff target already reaches source.
    if reaches(edges, &connection.target, &connection.source)? {
        return Err(Rejection::Cycle);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{EdgeId, EdgeKind, NodeKind, Position};

    fn nodes(ids: &[&str]) -> Vec<Node> {
        ids.iter()
            .map(|id| Node::new(NodeId::new(*id), NodeKind::Text, Position::ORIGIN))
            .collect()
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge::new(
            EdgeId::new(format!("{source}-{target}")),
            NodeId::new(source),
            NodeId::new(target),
            EdgeKind::Animated,
        )
    }

    #[test]
    fn test_closing_a_chain_is_a_cycle() {
        let nodes = nodes(&["A", "B", "C", "D"]);
        let edges = vec![edge("A", "B"), edge("B", "C")];

        let back = Connection::new("C", "A");
        assert_eq!(
            validate_connection(&nodes, &edges, &back, &AllowAll),
            Err(Rejection::Cycle)
        );
        let fresh = Connection::new("D", "A");
        assert_eq!(validate_connection(&nodes, &edges, &fresh, &AllowAll), Ok(()));
    }

    #[test]
    fn test_self_loop_and_missing_endpoint() {
        let nodes = nodes(&["A"]);
        assert_eq!(
            validate_connection(&nodes, &[], &Connection::new("A", "A"), &AllowAll),
            Err(Rejection::SelfLoop)
        );
        assert_eq!(
            validate_connection(&nodes, &[], &Connection::new("A", "Z"), &AllowAll),
            Err(Rejection::MissingEndpoint(NodeId::new("Z")))
        );
    }

    #[test]
    fn test_policy_is_consulted() {
        let mut nodes = nodes(&["audio", "text"]);
        nodes[0].node_type = "audio".into();
        let no_audio = |source: &Node, _: &Node| source.node_type != "audio";
        assert!(matches!(
            validate_connection(&nodes, &[], &Connection::new("audio", "text"), &no_audio),
            Err(Rejection::Incompatible { .. })
        ));
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let count = 50_000;
        let ids: Vec<String> = (0..count).map(|i| format!("n{i}")).collect();
        let edges: Vec<Edge> = ids.windows(2).map(|w| edge(&w[0], &w[1])).collect();
        let last = NodeId::new(ids[count - 1].clone());
        let first = NodeId::new(ids[0].clone());
        assert_eq!(reaches(&edges, &first, &last), Ok(true));
        assert_eq!(reaches(&edges, &last, &first), Ok(false));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let nodes = nodes(&["A", "B", "C", "D"]);
        let edges = vec![edge("A", "B"), edge("A", "C"), edge("B", "D")];
        assert_eq!(
            validate_connection(&nodes, &edges, &Connection::new("C", "D"), &AllowAll),
            Ok(())
        );
    }
}
