//! Path resolution and cycle detection over the primary child tree.

use std::collections::BTreeSet;
use std::fmt;

use smallvec::SmallVec;

use crate::assoc::ChildAssocRef;
use crate::error::{Result, StoreError};
use crate::store::{GraphStore, Tables};
use crate::types::{NodeId, NodePair};

/// One element of a [`Path`]: the store root the path starts at, followed
/// by the child association taken at each level.
#[derive(Clone, Debug)]
pub enum PathStep {
    Root(NodePair),
    Child(ChildAssocRef),
}

impl PathStep {
    /// The node this step lands on.
    pub fn node(&self) -> &NodePair {
        match self {
            PathStep::Root(pair) => pair,
            PathStep::Child(assoc) => &assoc.child,
        }
    }
}

/// A root-to-node path through the child-association graph.
///
/// Most of the tree is shallow, so the step sequence is inlined up to a
/// handful of levels before spilling to the heap.
#[derive(Clone, Debug)]
pub struct Path {
    steps: SmallVec<[PathStep; 4]>,
}

impl Path {
    fn new(steps: SmallVec<[PathStep; 4]>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The terminal node of the path.
    pub fn node(&self) -> Option<&NodePair> {
        self.steps.last().map(PathStep::node)
    }

    /// Whether every child step of the path is primary.
    pub fn is_primary(&self) -> bool {
        self.steps.iter().all(|step| match step {
            PathStep::Root(_) => true,
            PathStep::Child(assoc) => assoc.is_primary,
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote_child = false;
        for step in &self.steps {
            if let PathStep::Child(assoc) = step {
                write!(f, "/{}:{}", assoc.qname.ns, assoc.qname.local)?;
                wrote_child = true;
            }
        }
        if !wrote_child {
            f.write_str("/")?;
        }
        Ok(())
    }
}

impl GraphStore {
    /// All root-to-node paths for a node, via every parent association.
    ///
    /// With `primary_only`, only primary associations are followed and the
    /// result must be exactly one path: a live non-root node with zero
    /// primary paths is an orphan and more than one is structural
    /// corruption, both reported as integrity errors rather than silently
    /// picking one.
    pub fn paths(&self, node_id: NodeId, primary_only: bool) -> Result<Vec<Path>> {
        let info = self.parent_assocs_cached(node_id)?;
        let mut out = Vec::new();
        let mut chain: Vec<ChildAssocRef> = Vec::new();
        let mut on_chain = BTreeSet::new();
        on_chain.insert(node_id);

        if info.is_root {
            let tables = self.tables();
            let pair = tables.node_pair(node_id)?.ok_or_else(|| {
                StoreError::Integrity(format!("root node {node_id} vanished during path walk"))
            })?;
            drop(tables);
            let mut steps = SmallVec::new();
            steps.push(PathStep::Root(pair));
            out.push(Path::new(steps));
        } else {
            self.walk_up(node_id, primary_only, &mut chain, &mut on_chain, &mut out)?;
        }

        if primary_only {
            match out.len() {
                1 => {}
                0 => {
                    return Err(StoreError::Integrity(format!(
                        "node {node_id} has no primary path"
                    )))
                }
                n => {
                    return Err(StoreError::Integrity(format!(
                        "node {node_id} has {n} primary paths"
                    )))
                }
            }
        }
        Ok(out)
    }

    /// The single primary path of a node.
    pub fn primary_path(&self, node_id: NodeId) -> Result<Path> {
        let mut paths = self.paths(node_id, true)?;
        paths.pop().ok_or_else(|| {
            StoreError::Integrity(format!("node {node_id} has no primary path"))
        })
    }

    fn walk_up(
        &self,
        node_id: NodeId,
        primary_only: bool,
        chain: &mut Vec<ChildAssocRef>,
        on_chain: &mut BTreeSet<NodeId>,
        out: &mut Vec<Path>,
    ) -> Result<()> {
        if chain.len() >= self.config().cycle_check_limit {
            return Err(StoreError::Integrity(format!(
                "path depth exceeded {} while resolving node {node_id}",
                self.config().cycle_check_limit
            )));
        }
        let info = self.parent_assocs_cached(node_id)?;
        if info.is_root {
            let tables = self.tables();
            let root = tables.node_pair(node_id)?.ok_or_else(|| {
                StoreError::Integrity(format!("root node {node_id} vanished during path walk"))
            })?;
            drop(tables);
            let mut steps: SmallVec<[PathStep; 4]> = SmallVec::new();
            steps.push(PathStep::Root(root));
            for assoc in chain.iter().rev() {
                steps.push(PathStep::Child(assoc.clone()));
            }
            out.push(Path::new(steps));
            return Ok(());
        }
        for entity in info
            .parent_assocs
            .iter()
            .filter(|a| !primary_only || a.is_primary)
        {
            let parent_id = entity.parent_id;
            if !on_chain.insert(parent_id) {
                return Err(StoreError::CyclicRelationship(parent_id));
            }
            let assoc = {
                let tables = self.tables();
                self.child_assoc_ref(&tables, entity)?
            };
            chain.push(assoc);
            self.walk_up(parent_id, primary_only, chain, on_chain, out)?;
            chain.pop();
            on_chain.remove(&parent_id);
        }
        Ok(())
    }

    /// Validates the subtree under a node against cyclic child
    /// relationships, traversing every child association depth-first.
    ///
    /// Cycles cannot be produced through this API (moves check before
    /// mutating), so a hit here means external corruption; the check fails
    /// loudly instead of repairing.
    pub fn cycle_check(&self, node_id: NodeId) -> Result<()> {
        let tables = self.tables();
        if tables.node(node_id).is_none() {
            return Err(StoreError::InvalidArgument(format!(
                "node {node_id} does not exist"
            )));
        }
        let mut on_path = BTreeSet::new();
        let mut visited = 0usize;
        self.cycle_check_inner(&tables, node_id, &mut on_path, &mut visited)
    }

    fn cycle_check_inner(
        &self,
        tables: &Tables,
        node_id: NodeId,
        on_path: &mut BTreeSet<NodeId>,
        visited: &mut usize,
    ) -> Result<()> {
        *visited += 1;
        if *visited > self.config().cycle_check_limit {
            return Err(StoreError::Integrity(format!(
                "cycle check visited more than {} nodes under node {node_id}",
                self.config().cycle_check_limit
            )));
        }
        if !on_path.insert(node_id) {
            return Err(StoreError::CyclicRelationship(node_id));
        }
        let children: Vec<NodeId> = tables
            .child_by_parent
            .get(&node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .map(|a| a.child_id)
            .collect();
        for child_id in children {
            self.cycle_check_inner(tables, child_id, on_path, visited)?;
        }
        on_path.remove(&node_id);
        Ok(())
    }

    /// Whether re-parenting `child_id` under `new_parent_id` would close a
    /// loop in the primary tree. Walks the primary ancestry of the new
    /// parent; called before any move mutation.
    pub(crate) fn would_create_cycle(
        &self,
        tables: &Tables,
        child_id: NodeId,
        new_parent_id: NodeId,
    ) -> bool {
        if child_id == new_parent_id {
            return true;
        }
        let mut current = new_parent_id;
        let mut seen = BTreeSet::new();
        while seen.insert(current) && seen.len() <= self.config().cycle_check_limit {
            let Some(primary) = tables
                .child_by_child
                .get(&current)
                .into_iter()
                .flatten()
                .filter_map(|id| tables.child_assocs.get(id))
                .find(|a| a.is_primary)
            else {
                return false;
            };
            if primary.parent_id == child_id {
                return true;
            }
            current = primary.parent_id;
        }
        // Pre-existing cycle or unbounded ancestry above the target: the
        // move must not proceed either way.
        true
    }
}
