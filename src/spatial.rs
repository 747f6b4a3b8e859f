//! Uniform-grid spatial index over world bounds.
//!
//! The index is kept apart from the scene tree: nodes whose transform
//! changed are queued as pending and only re-bucketed on the next query, so
//! a node moved many times between queries is indexed once.

use std::collections::{HashMap, HashSet};

use crate::geometry::{Point, Rect};
use crate::tree::{NodeId, SceneTree};

/// Bounds spanning more cells than this are kept out of the grid and tested
/// linearly on every query.
const MAX_CELLS_PER_NODE: i64 = 1024;

type Cell = (i32, i32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    bound: Rect,
    /// Inclusive cell range, or `None` for oversized bounds
    cells: Option<(Cell, Cell)>,
}

#[derive(Debug)]
pub struct SpatialIndex {
    cell_size: f32,
    cells: HashMap<Cell, Vec<NodeId>>,
    entries: HashMap<NodeId, Entry>,
    oversized: HashSet<NodeId>,
    pending: HashSet<NodeId>,
}

impl SpatialIndex {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { 128.0 },
            cells: HashMap::new(),
            entries: HashMap::new(),
            oversized: HashSet::new(),
            pending: HashSet::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of nodes waiting to be re-bucketed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue a node (and, on sync, its subtree) for re-bucketing.
    pub fn mark_dirty(&mut self, id: NodeId) {
        self.pending.insert(id);
    }

    /// Drop a node from the index immediately.
    pub fn remove(&mut self, id: NodeId) {
        self.pending.remove(&id);
        if let Some(entry) = self.entries.remove(&id) {
            self.unbucket(id, entry);
        }
    }

    /// Pull moved nodes from the tree and re-bucket everything pending.
    pub fn sync(&mut self, tree: &mut SceneTree) {
        self.pending.extend(tree.take_moved());
        if self.pending.is_empty() {
            return;
        }

        let mut visited = HashSet::new();
        let pending: Vec<NodeId> = self.pending.drain().collect();
        for id in pending {
            if !tree.contains(id) {
                self.remove(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            self.reindex(tree, id);
            for child in tree.descendants(id) {
                if visited.insert(child) {
                    self.reindex(tree, child);
                }
            }
        }
    }

    /// Nodes whose world bound intersects `rect`, in id order.
    pub fn query_rect(&mut self, tree: &mut SceneTree, rect: &Rect) -> Vec<NodeId> {
        self.sync(tree);

        let mut hits: Vec<NodeId> = self
            .candidates(rect)
            .into_iter()
            .filter(|id| {
                self.entries
                    .get(id)
                    .is_some_and(|e| e.bound.intersects(rect))
            })
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Visible nodes under `point`, topmost first.
    ///
    /// Ordering follows the last traversal's paint order; nodes that were
    /// never painted come last. Points outside a node's clip do not hit it.
    pub fn query_point(&mut self, tree: &mut SceneTree, point: Point) -> Vec<NodeId> {
        self.sync(tree);

        let target = Rect::new(point.x, point.y, 0.0, 0.0);
        let mut hits = Vec::new();
        for id in self.candidates(&target) {
            let inside = self
                .entries
                .get(&id)
                .is_some_and(|e| e.bound.contains(point.x, point.y));
            if !inside || !tree.is_effectively_visible(id) {
                continue;
            }
            let unclipped = match tree.clip_rect(id) {
                Some(Some(clip)) => clip.contains(point.x, point.y),
                Some(None) => true,
                None => false,
            };
            if unclipped {
                hits.push(id);
            }
        }

        hits.sort_by(|a, b| {
            let (pa, pb) = (tree.last_paint_order(*a), tree.last_paint_order(*b));
            // Some(_) sorts after None, so reverse puts painted nodes first.
            pb.cmp(&pa).then(a.cmp(b))
        });
        hits
    }

    fn reindex(&mut self, tree: &mut SceneTree, id: NodeId) {
        if id == tree.root() {
            return;
        }
        let Some(bound) = tree.world_bound(id) else {
            self.remove(id);
            return;
        };
        let entry = Entry {
            bound,
            cells: self.cell_range(&bound),
        };
        match self.entries.insert(id, entry) {
            Some(old) if old.cells == entry.cells => return,
            Some(old) => self.unbucket(id, old),
            None => {}
        }
        self.bucket(id, entry);
    }

    fn cell_range(&self, rect: &Rect) -> Option<(Cell, Cell)> {
        let to_cell = |v: f32| (v / self.cell_size).floor() as i32;
        let min = (to_cell(rect.x), to_cell(rect.y));
        let max = (
            to_cell(rect.max_x().max(rect.x)),
            to_cell(rect.max_y().max(rect.y)),
        );
        let count =
            (max.0 as i64 - min.0 as i64 + 1) * (max.1 as i64 - min.1 as i64 + 1);
        if !rect.x.is_finite() || !rect.y.is_finite() || count > MAX_CELLS_PER_NODE {
            return None;
        }
        Some((min, max))
    }

    fn bucket(&mut self, id: NodeId, entry: Entry) {
        match entry.cells {
            Some((min, max)) => {
                for cx in min.0..=max.0 {
                    for cy in min.1..=max.1 {
                        self.cells.entry((cx, cy)).or_default().push(id);
                    }
                }
            }
            None => {
                self.oversized.insert(id);
            }
        }
    }

    fn unbucket(&mut self, id: NodeId, entry: Entry) {
        match entry.cells {
            Some((min, max)) => {
                for cx in min.0..=max.0 {
                    for cy in min.1..=max.1 {
                        if let Some(bucket) = self.cells.get_mut(&(cx, cy)) {
                            bucket.retain(|&n| n != id);
                            if bucket.is_empty() {
                                self.cells.remove(&(cx, cy));
                            }
                        }
                    }
                }
            }
            None => {
                self.oversized.remove(&id);
            }
        }
    }

    fn candidates(&self, rect: &Rect) -> HashSet<NodeId> {
        let mut out: HashSet<NodeId> = self.oversized.iter().copied().collect();
        match self.cell_range(rect) {
            Some((min, max)) => {
                for cx in min.0..=max.0 {
                    for cy in min.1..=max.1 {
                        if let Some(bucket) = self.cells.get(&(cx, cy)) {
                            out.extend(bucket.iter().copied());
                        }
                    }
                }
            }
            // Query area too large for the grid: scan everything.
            None => out.extend(self.entries.keys().copied()),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeProps;

    fn setup() -> (SceneTree, SpatialIndex) {
        (SceneTree::new(1920.0, 1080.0), SpatialIndex::new(100.0))
    }

    #[test]
    fn test_query_after_create() {
        let (mut tree, mut index) = setup();
        let a = tree
            .create_node(tree.root(), NodeProps::rect(10.0, 10.0, 50.0, 50.0))
            .unwrap();
        let b = tree
            .create_node(tree.root(), NodeProps::rect(500.0, 500.0, 50.0, 50.0))
            .unwrap();

        assert_eq!(index.query_point(&mut tree, Point::new(20.0, 20.0)), vec![a]);
        assert_eq!(
            index.query_rect(&mut tree, &Rect::new(0.0, 0.0, 1000.0, 1000.0)),
            {
                let mut v = vec![a, b];
                v.sort();
                v
            }
        );
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_moves_are_reconciled_lazily() {
        let (mut tree, mut index) = setup();
        let a = tree
            .create_node(tree.root(), NodeProps::rect(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        index.sync(&mut tree);

        tree.set_position(a, 300.0, 300.0);
        tree.set_position(a, 600.0, 600.0);
        assert!(index
            .query_point(&mut tree, Point::new(5.0, 5.0))
            .is_empty());
        assert_eq!(index.query_point(&mut tree, Point::new(605.0, 605.0)), vec![a]);
        assert_eq!(index.pending_len(), 0);
    }

    #[test]
    fn test_parent_move_rebuckets_subtree() {
        let (mut tree, mut index) = setup();
        let parent = tree
            .create_node(tree.root(), NodeProps::rect(0.0, 0.0, 100.0, 100.0))
            .unwrap();
        let child = tree
            .create_node(parent, NodeProps::rect(10.0, 10.0, 10.0, 10.0))
            .unwrap();
        index.sync(&mut tree);

        tree.set_x(parent, 1000.0);
        let hits = index.query_point(&mut tree, Point::new(1015.0, 15.0));
        assert!(hits.contains(&child));
        assert!(hits.contains(&parent));
    }

    #[test]
    fn test_hits_are_topmost_first() {
        let (mut tree, mut index) = setup();
        let below = tree
            .create_node(tree.root(), NodeProps::rect(0.0, 0.0, 100.0, 100.0))
            .unwrap();
        let above = tree
            .create_node(tree.root(), NodeProps::rect(0.0, 0.0, 100.0, 100.0))
            .unwrap();
        tree.begin_frame();
        tree.record_painted(below, 0);
        tree.record_painted(above, 1);

        assert_eq!(
            index.query_point(&mut tree, Point::new(50.0, 50.0)),
            vec![above, below]
        );
    }

    #[test]
    fn test_invisible_and_clipped_nodes_do_not_hit() {
        let (mut tree, mut index) = setup();
        let clip = tree
            .create_node(
                tree.root(),
                NodeProps::rect(0.0, 0.0, 100.0, 100.0).with_clipping(true),
            )
            .unwrap();
        let overflow = tree
            .create_node(clip, NodeProps::rect(50.0, 50.0, 100.0, 100.0))
            .unwrap();
        let hidden = tree
            .create_node(tree.root(), NodeProps::rect(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        tree.set_visible(hidden, false);

        assert!(index
            .query_point(&mut tree, Point::new(120.0, 120.0))
            .is_empty());
        assert!(index
            .query_point(&mut tree, Point::new(60.0, 60.0))
            .contains(&overflow));
        assert!(!index
            .query_point(&mut tree, Point::new(5.0, 5.0))
            .contains(&hidden));
    }

    #[test]
    fn test_remove_and_destroyed_nodes() {
        let (mut tree, mut index) = setup();
        let a = tree
            .create_node(tree.root(), NodeProps::rect(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        index.sync(&mut tree);
        assert_eq!(index.len(), 1);

        tree.destroy(a).unwrap();
        index.remove(a);
        assert!(index.is_empty());
        assert!(index
            .query_point(&mut tree, Point::new(5.0, 5.0))
            .is_empty());
    }

    #[test]
    fn test_oversized_bounds_are_still_found() {
        let (mut tree, mut index) = setup();
        let huge = tree
            .create_node(
                tree.root(),
                NodeProps::rect(-50_000.0, -50_000.0, 100_000.0, 100_000.0),
            )
            .unwrap();
        assert_eq!(index.query_point(&mut tree, Point::new(0.0, 0.0)), vec![huge]);
    }
}
