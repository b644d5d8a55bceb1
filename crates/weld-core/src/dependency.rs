//! Buffer dependency resolver.
//!
//! Records which nodes share one underlying buffer. Edges connect an owner to
//! a member living inside the owner's buffer. The connected components of the
//! edge set are the logical buffers the runtime allocates.
//!
//! A proposal is checked before it is committed: inside one component every
//! node may occupy at most one region, and two writers whose regions overlap
//! must be ordered by a path in the graph.

use crate::ir::{Graph, NodeId};
use crate::types::Dim;
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// How a member sits inside its owner's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    /// The member reads the owner's buffer starting `offset` elements in.
    View { offset: usize },
    /// The member writes slice `index` of a concatenation along `axis`.
    Slice {
        index: usize,
        axis: usize,
        offset: Dim,
        extent: Dim,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDependencyEdge {
    pub owner: NodeId,
    pub member: NodeId,
    pub kind: AliasKind,
}

impl BufferDependencyEdge {
    pub fn view(owner: NodeId, member: NodeId, offset: usize) -> Self {
        Self {
            owner,
            member,
            kind: AliasKind::View { offset },
        }
    }

    pub fn slice(
        owner: NodeId,
        member: NodeId,
        index: usize,
        axis: usize,
        offset: Dim,
        extent: Dim,
    ) -> Self {
        Self {
            owner,
            member,
            kind: AliasKind::Slice {
                index,
                axis,
                offset,
                extent,
            },
        }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.owner == node || self.member == node
    }
}

/// Region of a shared buffer a node writes.
#[derive(Debug, Clone, Copy)]
enum Region {
    Full,
    Slice {
        owner: NodeId,
        index: usize,
        axis: usize,
        offset: Dim,
        extent: Dim,
    },
}

impl Region {
    fn overlaps(&self, other: &Region) -> bool {
        match (*self, *other) {
            (
                Region::Slice {
                    owner: o1,
                    index: i1,
                    axis: a1,
                    offset: off1,
                    extent: e1,
                },
                Region::Slice {
                    owner: o2,
                    index: i2,
                    axis: a2,
                    offset: off2,
                    extent: e2,
                },
            ) => {
                if o1 == o2 {
                    return i1 == i2;
                }
                match (off1, e1, off2, e2) {
                    (Dim::Known(s1), Dim::Known(n1), Dim::Known(s2), Dim::Known(n2))
                        if a1 == a2 =>
                    {
                        s1 < s2 + n2 && s2 < s1 + n1
                    }
                    _ => true,
                }
            }
            _ => true,
        }
    }
}

/// Edge set of buffer-sharing relations.
#[derive(Debug, Clone, Default)]
pub struct BufferDependencies {
    edges: Vec<BufferDependencyEdge>,
}

impl BufferDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges(&self) -> &[BufferDependencyEdge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The edge placing `member` inside another buffer, if any.
    pub fn edge_for_member(&self, member: NodeId) -> Option<&BufferDependencyEdge> {
        self.edges.iter().find(|e| e.member == member)
    }

    /// Slice edges owned by `owner`, ordered by slice index.
    pub fn slices_of(&self, owner: NodeId) -> Vec<&BufferDependencyEdge> {
        let mut slices: Vec<_> = self
            .edges
            .iter()
            .filter(|e| e.owner == owner && matches!(e.kind, AliasKind::Slice { .. }))
            .collect();
        slices.sort_by_key(|e| match e.kind {
            AliasKind::Slice { index, .. } => index,
            AliasKind::View { .. } => usize::MAX,
        });
        slices
    }

    /// Every node sharing a buffer with `node`, including `node` itself.
    pub fn buffers_for(&self, node: NodeId) -> BTreeSet<NodeId> {
        component(&adjacency(self.edges.iter()), node)
    }

    /// All logical buffers with more than one member.
    pub fn groups(&self) -> Vec<BTreeSet<NodeId>> {
        let adj = adjacency(self.edges.iter());
        let mut seen = HashSet::new();
        let mut roots: Vec<NodeId> = adj.keys().copied().collect();
        roots.sort();

        let mut groups = Vec::new();
        for root in roots {
            if seen.contains(&root) {
                continue;
            }
            let group = component(&adj, root);
            seen.extend(group.iter().copied());
            groups.push(group);
        }
        groups
    }

    /// Check a proposal against the committed edges without changing anything.
    pub fn validate(&self, graph: &Graph, proposed: &[BufferDependencyEdge]) -> Result<()> {
        let mut members: HashSet<NodeId> = self.edges.iter().map(|e| e.member).collect();
        for edge in proposed {
            graph.get_node(edge.owner)?;
            let member = graph.get_node(edge.member)?;
            if edge.owner == edge.member {
                return Err(Error::BufferConflict(format!(
                    "'{}' cannot alias itself",
                    member.name
                )));
            }
            if !members.insert(edge.member) {
                return Err(Error::BufferConflict(format!(
                    "'{}' would occupy two regions",
                    member.name
                )));
            }
        }

        let merged: Vec<&BufferDependencyEdge> = self.edges.iter().chain(proposed).collect();
        let adj = adjacency(merged.iter().copied());
        let mut touched = BTreeSet::new();
        for edge in proposed {
            touched.extend(component(&adj, edge.owner));
        }

        let writers: Vec<(NodeId, Region)> = touched
            .iter()
            .filter_map(|&id| write_region(graph, &merged, id).map(|r| (id, r)))
            .collect();

        for (i, (a, region_a)) in writers.iter().enumerate() {
            for (b, region_b) in &writers[i + 1..] {
                if region_a.overlaps(region_b) && !graph.has_path(*a, *b) && !graph.has_path(*b, *a)
                {
                    let name = |id| graph.get_node(id).map(|n| n.name.clone());
                    return Err(Error::BufferConflict(format!(
                        "unordered writers '{}' and '{}' overlap",
                        name(*a)?,
                        name(*b)?
                    )));
                }
            }
        }
        Ok(())
    }

    /// Record edges that passed [`validate`](Self::validate).
    pub fn commit(&mut self, edges: Vec<BufferDependencyEdge>) {
        self.edges.extend(edges);
    }

    /// Replace the placement of already committed `(owner, member)` pairs
    /// with the one in `edges`. Pairs not yet committed are ignored. Returns
    /// how many edges changed.
    pub fn refresh(&mut self, edges: &[BufferDependencyEdge]) -> usize {
        let mut changed = 0;
        for update in edges {
            if let Some(edge) = self
                .edges
                .iter_mut()
                .find(|e| e.owner == update.owner && e.member == update.member)
                && edge.kind != update.kind
            {
                edge.kind = update.kind;
                changed += 1;
            }
        }
        changed
    }

    /// Drop every edge touching `node`. Returns how many were removed.
    pub fn remove_node_edges(&mut self, node: NodeId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|e| !e.touches(node));
        before - self.edges.len()
    }

    /// Drop the edges through which `node` borrows memory: the edge that makes
    /// it a member and the slices it hands out. Views of `node` stay, since
    /// they read whatever `node` ends up writing.
    pub fn detach(&mut self, node: NodeId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|e| {
            let hands_out_slice = e.owner == node && matches!(e.kind, AliasKind::Slice { .. });
            e.member != node && !hands_out_slice
        });
        before - self.edges.len()
    }
}

fn adjacency<'a>(
    edges: impl Iterator<Item = &'a BufferDependencyEdge>,
) -> HashMap<NodeId, Vec<NodeId>> {
    let mut adj: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in edges {
        adj.entry(edge.owner).or_default().push(edge.member);
        adj.entry(edge.member).or_default().push(edge.owner);
    }
    adj
}

fn component(adj: &HashMap<NodeId, Vec<NodeId>>, start: NodeId) -> BTreeSet<NodeId> {
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        for &next in adj.get(&id).into_iter().flatten() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

/// Region `id` writes inside its logical buffer, or `None` for non-writers.
fn write_region(graph: &Graph, edges: &[&BufferDependencyEdge], id: NodeId) -> Option<Region> {
    let mut slice = None;
    for edge in edges {
        match edge.kind {
            AliasKind::View { .. } if edge.member == id => return None,
            AliasKind::Slice { .. } if edge.owner == id => return None,
            AliasKind::Slice {
                index,
                axis,
                offset,
                extent,
            } if edge.member == id => {
                slice = Some(Region::Slice {
                    owner: edge.owner,
                    index,
                    axis,
                    offset,
                    extent,
                });
            }
            _ => {}
        }
    }
    if graph.get_node(id).is_ok_and(|n| n.state.is_optimized()) {
        return None;
    }
    Some(slice.unwrap_or(Region::Full))
}
