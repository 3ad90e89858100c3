//! The object graph: a directed multigraph of entity ids with typed forward
//! references and reverse multi-edges, each node carrying its own
//! subscriber list (§4.1).
//!
//! Represented as ids + side-tables rather than owning pointers, per the
//! design note on the graph's intentional cyclicity (users may reference
//! posts which reference users back).

use std::collections::{HashMap, HashSet};

use thiserror::Error;

pub type ResourceName = String;
pub type EntityId = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub resource: ResourceName,
    pub id: EntityId,
}

impl NodeKey {
    pub fn new(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node already exists: {0:?}")]
    AlreadyExists(NodeKey),
    #[error("node not found: {0:?}")]
    NotFound(NodeKey),
}

/// The reverse side of a forward reference. Seeded as `Many` for relations
/// declared incoming-many at node creation; becomes `One` lazily the first
/// time a single-valued reverse pointer is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseEdge {
    Many(HashSet<EntityId>),
    One(Option<EntityId>),
}

impl ReverseEdge {
    fn ids(&self) -> Vec<EntityId> {
        match self {
            ReverseEdge::Many(set) => set.iter().cloned().collect(),
            ReverseEdge::One(Some(id)) => vec![id.clone()],
            ReverseEdge::One(None) => Vec::new(),
        }
    }
}

type Subscriber = Box<dyn Fn(&NodeKey) + Send + Sync>;

struct Node {
    key: NodeKey,
    references: HashMap<ResourceName, EntityId>,
    referenced_by: HashMap<ResourceName, ReverseEdge>,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber_id: u64,
}

impl Node {
    fn new(key: NodeKey, incoming_many_edges: &[ResourceName]) -> Self {
        let referenced_by = incoming_many_edges
            .iter()
            .map(|edge| (edge.clone(), ReverseEdge::Many(HashSet::new())))
            .collect();
        Self {
            key,
            references: HashMap::new(),
            referenced_by,
            subscribers: Vec::new(),
            next_subscriber_id: 0,
        }
    }
}

/// Handle returned by [`ObjectGraph::subscribe`]. Dropping it does nothing;
/// call [`Unsubscribe::run`] (or just call it like a closure) to detach.
pub struct Unsubscribe {
    resource: ResourceName,
    id: EntityId,
    subscriber_id: u64,
}

#[derive(Debug, Default)]
pub struct ObjectGraph {
    nodes: HashMap<NodeKey, Node>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn create_node(
        &mut self,
        key: NodeKey,
        incoming_many_edges: &[ResourceName],
    ) -> Result<(), GraphError> {
        if self.nodes.contains_key(&key) {
            return Err(GraphError::AlreadyExists(key));
        }
        let node = Node::new(key.clone(), incoming_many_edges);
        self.nodes.insert(key, node);
        Ok(())
    }

    pub fn references(&self, key: &NodeKey) -> Option<&HashMap<ResourceName, EntityId>> {
        self.nodes.get(key).map(|n| &n.references)
    }

    pub fn referenced_by(&self, key: &NodeKey, edge: &str) -> Option<&ReverseEdge> {
        self.nodes.get(key).and_then(|n| n.referenced_by.get(edge))
    }

    /// Records `source --target.resource--> target`. Both nodes must
    /// already exist (§4.1 edge-case policy: the caller — the store —
    /// creates the target node eagerly before linking). Overwrites any
    /// prior link from `source` to a node of `target.resource`'s type,
    /// cleaning up the stale reverse edge so the graph invariant (every
    /// forward reference has a matching reverse entry) always holds.
    pub fn create_link(&mut self, source: &NodeKey, target: &NodeKey) -> Result<(), GraphError> {
        if !self.nodes.contains_key(source) {
            return Err(GraphError::NotFound(source.clone()));
        }
        if !self.nodes.contains_key(target) {
            return Err(GraphError::NotFound(target.clone()));
        }

        let previous = self
            .nodes
            .get_mut(source)
            .unwrap()
            .references
            .insert(target.resource.clone(), target.id.clone());

        if let Some(previous_id) = previous {
            if previous_id != target.id {
                let previous_target = NodeKey::new(target.resource.clone(), previous_id);
                self.detach_reverse(&previous_target, &source.resource, &source.id);
            }
        }

        self.attach_reverse(target, &source.resource, &source.id);

        self.notify(target);
        self.notify(source);
        Ok(())
    }

    /// Removes the forward edge `source --targetType-->`, and the matching
    /// reverse entry on whichever node it pointed at. Notifies both
    /// endpoints.
    pub fn remove_link(
        &mut self,
        source: &NodeKey,
        target_type: &str,
    ) -> Result<(), GraphError> {
        let removed_id = self
            .nodes
            .get_mut(source)
            .ok_or_else(|| GraphError::NotFound(source.clone()))?
            .references
            .remove(target_type);

        if let Some(target_id) = removed_id {
            let target = NodeKey::new(target_type, target_id);
            self.detach_reverse(&target, &source.resource, &source.id);
            self.notify(&target);
        }
        self.notify(source);
        Ok(())
    }

    fn attach_reverse(&mut self, target: &NodeKey, source_resource: &str, source_id: &str) {
        let Some(node) = self.nodes.get_mut(target) else {
            return;
        };
        match node.referenced_by.get_mut(source_resource) {
            Some(ReverseEdge::Many(set)) => {
                set.insert(source_id.to_string());
            }
            _ => {
                node.referenced_by.insert(
                    source_resource.to_string(),
                    ReverseEdge::One(Some(source_id.to_string())),
                );
            }
        }
    }

    fn detach_reverse(&mut self, target: &NodeKey, source_resource: &str, source_id: &str) {
        let Some(node) = self.nodes.get_mut(target) else {
            return;
        };
        match node.referenced_by.get_mut(source_resource) {
            Some(ReverseEdge::Many(set)) => {
                set.remove(source_id);
            }
            Some(edge @ ReverseEdge::One(_)) => {
                *edge = ReverseEdge::One(None);
            }
            None => {}
        }
    }

    /// Fails if the node doesn't exist. The returned [`Unsubscribe`] must
    /// be passed back to [`ObjectGraph::unsubscribe`].
    pub fn subscribe<F>(&mut self, key: &NodeKey, callback: F) -> Result<Unsubscribe, GraphError>
    where
        F: Fn(&NodeKey) + Send + Sync + 'static,
    {
        let node = self
            .nodes
            .get_mut(key)
            .ok_or_else(|| GraphError::NotFound(key.clone()))?;
        let id = node.next_subscriber_id;
        node.next_subscriber_id += 1;
        node.subscribers.push((id, Box::new(callback)));
        Ok(Unsubscribe {
            resource: key.resource.clone(),
            id: key.id.clone(),
            subscriber_id: id,
        })
    }

    pub fn unsubscribe(&mut self, handle: Unsubscribe) {
        let key = NodeKey::new(handle.resource, handle.id);
        if let Some(node) = self.nodes.get_mut(&key) {
            node.subscribers.retain(|(id, _)| *id != handle.subscriber_id);
        }
    }

    /// Clears reverse edges pointing to `key`'s own references, notifying
    /// the affected source nodes whose link into this node now dangles,
    /// then removes the node itself.
    pub fn remove_node(&mut self, key: &NodeKey) -> Result<(), GraphError> {
        let node = self
            .nodes
            .remove(key)
            .ok_or_else(|| GraphError::NotFound(key.clone()))?;

        for (source_resource, edge) in &node.referenced_by {
            for source_id in edge.ids() {
                self.notify(&NodeKey::new(source_resource.clone(), source_id));
            }
        }
        Ok(())
    }

    /// Directly fires a node's subscribers without any graph mutation —
    /// used by callers that change a node's own fields rather than its
    /// links (the store's field mutations, §4.2.8).
    pub fn notify(&self, key: &NodeKey) {
        if let Some(node) = self.nodes.get(key) {
            for (_, callback) in &node.subscribers {
                callback(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn users_org_graph() -> (ObjectGraph, NodeKey, NodeKey) {
        let mut graph = ObjectGraph::new();
        let org = NodeKey::new("orgs", "o1");
        let user = NodeKey::new("users", "u1");
        graph.create_node(org.clone(), &["users".to_string()]).unwrap();
        graph.create_node(user.clone(), &[]).unwrap();
        (graph, org, user)
    }

    #[test]
    fn create_node_fails_on_duplicate() {
        let (mut graph, org, _) = users_org_graph();
        assert_eq!(
            graph.create_node(org, &[]).unwrap_err().to_string().contains("already exists"),
            true
        );
    }

    #[test]
    fn create_link_sets_forward_and_reverse() {
        let (mut graph, org, user) = users_org_graph();
        graph.create_link(&user, &org).unwrap();

        assert_eq!(
            graph.references(&user).unwrap().get("orgs"),
            Some(&"o1".to_string())
        );
        match graph.referenced_by(&org, "users").unwrap() {
            ReverseEdge::Many(set) => assert!(set.contains("u1")),
            _ => panic!("expected many edge"),
        }
    }

    #[test]
    fn create_link_requires_both_nodes_to_exist() {
        let mut graph = ObjectGraph::new();
        let user = NodeKey::new("users", "u1");
        graph.create_node(user.clone(), &[]).unwrap();
        let org = NodeKey::new("orgs", "missing");
        assert!(graph.create_link(&user, &org).is_err());
    }

    #[test]
    fn re_linking_same_target_type_overwrites_and_cleans_old_reverse() {
        let mut graph = ObjectGraph::new();
        let user = NodeKey::new("users", "u1");
        let org_a = NodeKey::new("orgs", "o1");
        let org_b = NodeKey::new("orgs", "o2");
        graph.create_node(user.clone(), &[]).unwrap();
        graph.create_node(org_a.clone(), &["users".to_string()]).unwrap();
        graph.create_node(org_b.clone(), &["users".to_string()]).unwrap();

        graph.create_link(&user, &org_a).unwrap();
        graph.create_link(&user, &org_b).unwrap();

        assert_eq!(
            graph.references(&user).unwrap().get("orgs"),
            Some(&"o2".to_string())
        );
        match graph.referenced_by(&org_a, "users").unwrap() {
            ReverseEdge::Many(set) => assert!(!set.contains("u1")),
            _ => panic!("expected many edge"),
        }
        match graph.referenced_by(&org_b, "users").unwrap() {
            ReverseEdge::Many(set) => assert!(set.contains("u1")),
            _ => panic!("expected many edge"),
        }
    }

    #[test]
    fn remove_link_clears_both_sides() {
        let (mut graph, org, user) = users_org_graph();
        graph.create_link(&user, &org).unwrap();
        graph.remove_link(&user, "orgs").unwrap();

        assert!(graph.references(&user).unwrap().get("orgs").is_none());
        match graph.referenced_by(&org, "users").unwrap() {
            ReverseEdge::Many(set) => assert!(set.is_empty()),
            _ => panic!("expected many edge"),
        }
    }

    #[test]
    fn subscribers_notified_on_link_and_unlink() {
        let (mut graph, org, user) = users_org_graph();
        let hits = Arc::new(Mutex::new(0));
        let hits_clone = Arc::clone(&hits);
        let handle = graph
            .subscribe(&org, move |_| {
                *hits_clone.lock().unwrap() += 1;
            })
            .unwrap();

        graph.create_link(&user, &org).unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);

        graph.remove_link(&user, "orgs").unwrap();
        assert_eq!(*hits.lock().unwrap(), 2);

        graph.unsubscribe(handle);
        graph.create_link(&user, &org).unwrap();
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[test]
    fn remove_node_notifies_sources_with_dangling_links() {
        let (mut graph, org, user) = users_org_graph();
        graph.create_link(&user, &org).unwrap();

        let hits = Arc::new(Mutex::new(0));
        let hits_clone = Arc::clone(&hits);
        graph
            .subscribe(&user, move |_| {
                *hits_clone.lock().unwrap() += 1;
            })
            .unwrap();

        graph.remove_node(&org).unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert!(!graph.contains(&org));
    }

    #[test]
    fn subscribe_fails_on_missing_node() {
        let mut graph = ObjectGraph::new();
        let missing = NodeKey::new("users", "ghost");
        assert!(graph.subscribe(&missing, |_| {}).is_err());
    }
}
