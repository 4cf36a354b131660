//! Transportable object graph
//!
//! Results of a unit of work are object graphs: typed nodes with scalar
//! fields and references to other nodes. Nodes live in an arena and refer to
//! each other by [`NodeId`], so cyclic domain graphs (an image and its
//! pixels pointing at each other) are ordinary data.
//!
//! Nodes fetched from the data layer may carry an [`AmbientContext`] in their
//! [`Details`]. It must be stripped (see `sanitize`) before the graph is
//! serialized; serializing it is an error.

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Index of a node within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the node arena
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Process-wide configuration/environment state attached by the data layer
///
/// Cheap to clone; every clone points at the same state. It is not
/// transportable and refuses to serialize.
#[derive(Debug, Clone, Default)]
pub struct AmbientContext {
    properties: Arc<HashMap<String, String>>,
}

impl AmbientContext {
    /// Create a context over a set of properties
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self {
            properties: Arc::new(properties),
        }
    }

    /// Property lookup
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl Serialize for AmbientContext {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom(
            "ambient context is not transportable; sanitize the graph first",
        ))
    }
}

/// Ownership and permission details of a node
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,

    /// Back-pointer to ambient state; must be `None` before serialization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<AmbientContext>,
}

/// Field value of a node
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    /// Scalar or array value
    Value(serde_json::Value),
    /// Single reference to another node
    Ref(NodeId),
    /// Collection of references
    Refs(Vec<NodeId>),
}

impl Field {
    fn targets(&self) -> &[NodeId] {
        match self {
            Field::Value(_) => &[],
            Field::Ref(id) => std::slice::from_ref(id),
            Field::Refs(ids) => ids,
        }
    }
}

/// A single domain object
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectNode {
    /// Domain type (e.g. "Image", "Pixels", "OriginalFile")
    pub kind: String,

    /// Record id
    pub id: i64,

    /// Named fields
    pub fields: BTreeMap<String, Field>,

    pub details: Details,
}

impl ObjectNode {
    /// Create a node with no fields
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
            fields: BTreeMap::new(),
            details: Details::default(),
        }
    }

    /// Add a scalar field
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), Field::Value(value.into()));
        self
    }

    /// Set the owner of the node
    pub fn with_owner(mut self, owner_id: i64, group_id: i64) -> Self {
        self.details.owner_id = Some(owner_id);
        self.details.group_id = Some(group_id);
        self
    }

    /// Attach an ambient context
    pub fn with_context(mut self, context: AmbientContext) -> Self {
        self.details.contexts = Some(context);
        self
    }

    /// Scalar field lookup
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        match self.fields.get(name) {
            Some(Field::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// All node ids this node references
    pub fn references(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.fields.values().flat_map(|f| f.targets().iter().copied())
    }
}

/// Arena of nodes plus the ids of the result's root objects
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectGraph {
    nodes: Vec<ObjectNode>,
    roots: Vec<NodeId>,
}

impl ObjectGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph holding a single root node
    pub fn single(node: ObjectNode) -> Self {
        let mut graph = Self::new();
        let id = graph.add(node);
        graph.push_root(id);
        graph
    }

    /// Add a node, returning its id
    pub fn add(&mut self, node: ObjectNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Mark a node as a root of the result
    pub fn push_root(&mut self, id: NodeId) {
        self.roots.push(id);
    }

    /// Set a single-reference field; ignored if `from` is not in this graph
    pub fn set_ref(&mut self, from: NodeId, field: impl Into<String>, to: NodeId) {
        if let Some(node) = self.nodes.get_mut(from.0) {
            node.fields.insert(field.into(), Field::Ref(to));
        }
    }

    /// Append to a collection field, creating it if absent
    ///
    /// Ignored if `from` is not in this graph.
    pub fn link(&mut self, from: NodeId, field: impl Into<String>, to: NodeId) {
        let Some(node) = self.nodes.get_mut(from.0) else {
            return;
        };
        let entry = node
            .fields
            .entry(field.into())
            .or_insert_with(|| Field::Refs(Vec::new()));
        match entry {
            Field::Refs(ids) => ids.push(to),
            other => *other = Field::Refs(vec![to]),
        }
    }

    /// Move every node of `other` into this graph
    ///
    /// Returns the new ids of `other`'s roots. They are not added to this
    /// graph's roots.
    pub fn merge(&mut self, other: ObjectGraph) -> Vec<NodeId> {
        let offset = self.nodes.len();
        let shift = |id: NodeId| NodeId(id.0 + offset);
        for mut node in other.nodes {
            for field in node.fields.values_mut() {
                match field {
                    Field::Value(_) => {}
                    Field::Ref(id) => *id = shift(*id),
                    Field::Refs(ids) => ids.iter_mut().for_each(|id| *id = shift(*id)),
                }
            }
            self.nodes.push(node);
        }
        other.roots.into_iter().map(shift).collect()
    }

    /// Drop every node not in `keep` and renumber the survivors
    ///
    /// Arena order is preserved. Roots and references that pointed at a
    /// dropped node are removed. Returns the number of nodes dropped.
    pub fn retain_nodes(&mut self, keep: &HashSet<NodeId>) -> usize {
        let mut remap = vec![None; self.nodes.len()];
        let mut next = 0;
        for (index, slot) in remap.iter_mut().enumerate() {
            if keep.contains(&NodeId(index)) {
                *slot = Some(NodeId(next));
                next += 1;
            }
        }
        let dropped = self.nodes.len() - next;
        if dropped == 0 {
            return 0;
        }

        let lookup = |id: NodeId| remap.get(id.0).copied().flatten();
        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(index, _)| remap[*index].is_some())
            .map(|(_, mut node)| {
                node.fields.retain(|_, field| match field {
                    Field::Value(_) => true,
                    Field::Ref(id) => match lookup(*id) {
                        Some(new) => {
                            *id = new;
                            true
                        }
                        None => false,
                    },
                    Field::Refs(ids) => {
                        *ids = ids.iter().filter_map(|id| lookup(*id)).collect();
                        true
                    }
                });
                node
            })
            .collect();
        self.roots = self.roots.iter().filter_map(|id| lookup(*id)).collect();
        dropped
    }

    /// Node lookup
    pub fn node(&self, id: NodeId) -> Option<&ObjectNode> {
        self.nodes.get(id.0)
    }

    /// Mutable node lookup
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ObjectNode> {
        self.nodes.get_mut(id.0)
    }

    /// Root ids
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// First root node
    pub fn root(&self) -> Option<&ObjectNode> {
        self.roots.first().and_then(|id| self.node(*id))
    }

    /// Nodes referenced by a collection or single-reference field
    pub fn referenced(&self, from: NodeId, field: &str) -> Vec<NodeId> {
        self.node(from)
            .and_then(|n| n.fields.get(field))
            .map(|f| f.targets().to_vec())
            .unwrap_or_default()
    }

    /// All nodes in arena order
    pub fn nodes(&self) -> &[ObjectNode] {
        &self.nodes
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach `context` to every node
    pub fn attach_context(&mut self, context: &AmbientContext) {
        for node in &mut self.nodes {
            node.details.contexts = Some(context.clone());
        }
    }
}
