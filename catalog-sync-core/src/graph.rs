//! Dependency graph over one catalog snapshot.
//!
//! Publish and delete traverse the same prerequisite/bundle relation in
//! opposite directions, so both a forward and a reverse index are built once
//! per run. Traversal is depth-first with three-colour marking: the
//! "currently visiting" state is kept separate from "processed" so that a
//! pathological cycle is detected and reported instead of recursing forever.
//! The catalog relation is acyclic in practice, but that is an observation
//! about vendor data, not something this module may rely on.

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{PackageDescriptor, PackageId, PackageKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle detected involving package {0}")]
    Cycle(PackageId),
}

struct Node {
    descriptor: PackageDescriptor,
    /// Forward edges restricted to identities present in this snapshot.
    /// References to packages outside the snapshot are not traversed; the
    /// remote existence check is the authority on those.
    dependencies: Vec<PackageId>,
    /// Inverted edges, filled in one pass over all descriptors.
    dependents: Vec<PackageId>,
}

/// Arena of nodes keyed by identity, plus the catalog enumeration order that
/// makes traversals deterministic.
pub struct DependencyGraph {
    nodes: HashMap<PackageId, Node>,
    order: Vec<PackageId>,
}

/// How one import pass should be executed.
#[derive(Debug, PartialEq, Eq)]
pub enum PublishPlan {
    /// General case: strict dependency order, one operation after another.
    Ordered(Vec<PackageId>),
    /// Restricted topology some vendors are known to ship: exactly one
    /// detectoid that everything else depends on and no other internal
    /// edges. The detectoid goes first and alone; the rest are mutually
    /// independent and safe to fan out concurrently.
    FastPath {
        detectoid: PackageId,
        rest: Vec<PackageId>,
    },
}

enum Mark {
    Visiting,
    Processed,
}

impl DependencyGraph {
    /// Build the forward and reverse indices from one snapshot's descriptor
    /// set. Duplicate identities violate the snapshot invariant; the first
    /// occurrence wins and the duplicate is dropped with a warning.
    pub fn build(descriptors: Vec<PackageDescriptor>) -> Self {
        let mut nodes: HashMap<PackageId, Node> = HashMap::with_capacity(descriptors.len());
        let mut order = Vec::with_capacity(descriptors.len());

        for descriptor in &descriptors {
            if nodes.contains_key(&descriptor.id) {
                warn!(package = %descriptor.id, "duplicate package identity in snapshot, dropped");
                continue;
            }
            order.push(descriptor.id);
            nodes.insert(
                descriptor.id,
                Node {
                    descriptor: descriptor.clone(),
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                },
            );
        }

        // Forward edges, restricted to the snapshot, then inverted once.
        for id in &order {
            let deps: Vec<PackageId> = nodes[id]
                .descriptor
                .dependency_ids()
                .filter(|dep| *dep != *id && nodes.contains_key(dep))
                .collect();
            for dep in &deps {
                nodes.get_mut(dep).unwrap().dependents.push(*id);
            }
            nodes.get_mut(id).unwrap().dependencies = deps;
        }

        DependencyGraph { nodes, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn descriptor(&self, id: &PackageId) -> Option<&PackageDescriptor> {
        self.nodes.get(id).map(|n| &n.descriptor)
    }

    /// Identities in catalog enumeration order.
    pub fn ids(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.order.iter().copied()
    }

    /// Identities in an order where every package's in-snapshot dependencies
    /// precede it. O(V+E); every node visited at most once.
    pub fn publish_order(&self) -> Result<Vec<PackageId>, GraphError> {
        self.traverse(|node| &node.dependencies)
    }

    /// Identities in an order where every package's dependents precede it:
    /// the exact reverse relation of [`Self::publish_order`].
    pub fn delete_order(&self) -> Result<Vec<PackageId>, GraphError> {
        self.traverse(|node| &node.dependents)
    }

    fn traverse<'a, F>(&'a self, edges: F) -> Result<Vec<PackageId>, GraphError>
    where
        F: Fn(&'a Node) -> &'a Vec<PackageId>,
    {
        let mut marks: HashMap<PackageId, Mark> = HashMap::with_capacity(self.nodes.len());
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.order {
            self.visit(*root, &edges, &mut marks, &mut out)?;
        }
        Ok(out)
    }

    fn visit<'a, F>(
        &'a self,
        id: PackageId,
        edges: &F,
        marks: &mut HashMap<PackageId, Mark>,
        out: &mut Vec<PackageId>,
    ) -> Result<(), GraphError>
    where
        F: Fn(&'a Node) -> &'a Vec<PackageId>,
    {
        match marks.get(&id) {
            Some(Mark::Processed) => return Ok(()),
            Some(Mark::Visiting) => return Err(GraphError::Cycle(id)),
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        for next in edges(&self.nodes[&id]) {
            self.visit(*next, edges, marks, out)?;
        }
        marks.insert(id, Mark::Processed);
        out.push(id);
        Ok(())
    }

    /// Decide how to run the import pass. The fast path is an optimisation
    /// for the known single-detectoid topology; anything else, including a
    /// snapshot with more than one detectoid, falls back to the general
    /// ordered traversal.
    pub fn plan(&self) -> Result<PublishPlan, GraphError> {
        let detectoids: Vec<PackageId> = self
            .order
            .iter()
            .filter(|id| self.nodes[id].descriptor.kind == PackageKind::Detectoid)
            .copied()
            .collect();

        if detectoids.len() == 1 {
            let detectoid = detectoids[0];
            let only_detectoid_edges = self.order.iter().all(|id| {
                let node = &self.nodes[id];
                if *id == detectoid {
                    node.dependencies.is_empty()
                } else {
                    node.dependencies.iter().all(|dep| *dep == detectoid)
                }
            });
            if only_detectoid_edges {
                debug!(detectoid = %detectoid, "single-detectoid topology, taking fast path");
                // Validate the general invariant anyway so a cyclic snapshot
                // is still rejected before any repository call.
                self.publish_order()?;
                let rest = self
                    .order
                    .iter()
                    .filter(|id| **id != detectoid)
                    .copied()
                    .collect();
                return Ok(PublishPlan::FastPath { detectoid, rest });
            }
        } else if detectoids.len() > 1 {
            debug!(
                count = detectoids.len(),
                "multiple detectoids in snapshot, fast path rejected"
            );
        }

        Ok(PublishPlan::Ordered(self.publish_order()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PackageKind, PrerequisiteGroup};

    fn pkg(id: PackageId, kind: PackageKind) -> PackageDescriptor {
        PackageDescriptor::new(id, format!("pkg-{id}"), kind)
    }

    #[test]
    fn publish_order_respects_prereq_and_bundle_edges() {
        let (a, b, c) = (PackageId::new(), PackageId::new(), PackageId::new());
        let pa = pkg(a, PackageKind::Ordinary);
        let mut pb = pkg(b, PackageKind::Ordinary);
        pb.prerequisites.push(PrerequisiteGroup::single(a));
        let mut pc = pkg(c, PackageKind::Ordinary);
        pc.bundle = vec![a, b];

        let graph = DependencyGraph::build(vec![pc.clone(), pb, pa]);
        let order = graph.publish_order().unwrap();
        assert_eq!(order.len(), 3);
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));

        let delete = graph.delete_order().unwrap();
        let dpos = |id| delete.iter().position(|x| *x == id).unwrap();
        assert!(dpos(c) < dpos(b));
        assert!(dpos(b) < dpos(a));
    }

    #[test]
    fn cycle_is_detected_not_hung() {
        let (a, b) = (PackageId::new(), PackageId::new());
        let mut pa = pkg(a, PackageKind::Ordinary);
        pa.prerequisites.push(PrerequisiteGroup::single(b));
        let mut pb = pkg(b, PackageKind::Ordinary);
        pb.prerequisites.push(PrerequisiteGroup::single(a));

        let graph = DependencyGraph::build(vec![pa, pb]);
        assert!(matches!(graph.publish_order(), Err(GraphError::Cycle(_))));
        assert!(matches!(graph.plan(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn edges_out_of_snapshot_are_not_traversed() {
        let a = PackageId::new();
        let mut pa = pkg(a, PackageKind::Ordinary);
        pa.prerequisites.push(PrerequisiteGroup::single(PackageId::new()));
        let graph = DependencyGraph::build(vec![pa]);
        assert_eq!(graph.publish_order().unwrap(), vec![a]);
    }

    #[test]
    fn single_detectoid_topology_takes_fast_path() {
        let d = PackageId::new();
        let mut descriptors = vec![pkg(d, PackageKind::Detectoid)];
        for _ in 0..5 {
            let mut p = pkg(PackageId::new(), PackageKind::Ordinary);
            p.prerequisites.push(PrerequisiteGroup::single(d));
            descriptors.push(p);
        }
        let graph = DependencyGraph::build(descriptors);
        match graph.plan().unwrap() {
            PublishPlan::FastPath { detectoid, rest } => {
                assert_eq!(detectoid, d);
                assert_eq!(rest.len(), 5);
            }
            other => panic!("expected fast path, got {other:?}"),
        }
    }

    #[test]
    fn two_detectoids_reject_fast_path() {
        let descriptors = vec![
            pkg(PackageId::new(), PackageKind::Detectoid),
            pkg(PackageId::new(), PackageKind::Detectoid),
            pkg(PackageId::new(), PackageKind::Ordinary),
        ];
        let graph = DependencyGraph::build(descriptors);
        assert!(matches!(graph.plan().unwrap(), PublishPlan::Ordered(_)));
    }

    #[test]
    fn ordinary_internal_edges_reject_fast_path() {
        let d = PackageId::new();
        let a = PackageId::new();
        let mut b = pkg(PackageId::new(), PackageKind::Ordinary);
        b.prerequisites.push(PrerequisiteGroup::single(a));
        let graph = DependencyGraph::build(vec![
            pkg(d, PackageKind::Detectoid),
            pkg(a, PackageKind::Ordinary),
            b,
        ]);
        assert!(matches!(graph.plan().unwrap(), PublishPlan::Ordered(_)));
    }
}
