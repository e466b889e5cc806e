// SPDX-License-Identifier: MIT OR Apache-2.0
//! Quadrant-tree spatial index over 2D points.
//!
//! Answers "which data lie within this rectangle" in better than linear time
//! and supports incremental repositioning. The boundary grows outward when a
//! point lands outside it, quadrant by quadrant, so callers never see an
//! insert rejected for being far from the origin.

use crate::geom::{Rect, Vec2};

/// Points stored per node before it subdivides.
const CAPACITY: usize = 4;

/// Upper bound on boundary-doubling iterations for a single insert. Each step
/// doubles the covered extent, so 100 steps exceed any representable
/// coordinate; the cap exists as a safety bound against malformed (NaN or
/// infinite) positions that would otherwise loop forever.
const GROW_LIMIT: usize = 100;

/// Minimum boundary extent below which a node refuses to subdivide and
/// accumulates points in place instead. Guards against unbounded recursion
/// when many points share near-identical coordinates.
const MIN_EXTENT: f32 = 0.001;

/// A quadtree node. The root is the whole index; interior nodes own four
/// children covering their NW, NE, SW, SE quadrants.
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    boundary: Rect,
    points: Vec<(Vec2, T)>,
    children: Option<Box<[QuadTree<T>; 4]>>,
}

impl<T: Copy + PartialEq> QuadTree<T> {
    /// Create an empty tree covering the given boundary.
    pub fn new(boundary: Rect) -> Self {
        Self {
            boundary,
            points: Vec::new(),
            children: None,
        }
    }

    /// The current root boundary. Grows as out-of-bounds points are inserted.
    pub fn boundary(&self) -> Rect {
        self.boundary
    }

    /// Insert a data point, growing the boundary if the point lies outside it.
    ///
    /// Returns false only if the point still falls outside the boundary after
    /// [`GROW_LIMIT`] doublings, which cannot happen for finite coordinates.
    pub fn insert(&mut self, pos: Vec2, data: T) -> bool {
        let mut steps = 0;
        while !self.boundary.contains(pos) && steps < GROW_LIMIT {
            self.grow(pos);
            steps += 1;
        }
        self.insert_recursive(pos, data)
    }

    fn insert_recursive(&mut self, pos: Vec2, data: T) -> bool {
        if !self.boundary.contains(pos) {
            return false;
        }

        if self.children.is_none() {
            if self.points.len() < CAPACITY {
                self.points.push((pos, data));
                return true;
            }
            self.subdivide();
            // Subdivision refused (degenerate boundary): overflow in place.
            if self.children.is_none() {
                self.points.push((pos, data));
                return true;
            }
        }

        if let Some(children) = self.children.as_deref_mut() {
            for child in children {
                if child.insert_recursive(pos, data) {
                    return true;
                }
            }
        }
        false
    }

    /// Split this node into four quadrants and redistribute its points.
    fn subdivide(&mut self) {
        let Rect { x, y, w, h } = self.boundary;
        if w < MIN_EXTENT || h < MIN_EXTENT {
            return;
        }

        let (hw, hh) = (w / 2.0, h / 2.0);
        self.children = Some(Box::new([
            QuadTree::new(Rect::new(x, y, hw, hh)),
            QuadTree::new(Rect::new(x + hw, y, hw, hh)),
            QuadTree::new(Rect::new(x, y + hh, hw, hh)),
            QuadTree::new(Rect::new(x + hw, y + hh, hw, hh)),
        ]));

        let staged = std::mem::take(&mut self.points);
        for (pos, data) in staged {
            self.insert_recursive(pos, data);
        }
    }

    /// Remove the first point with a matching position and data.
    ///
    /// A parent whose four children end up as empty leaves collapses back
    /// into a single leaf, amortizing cleanup against churn.
    pub fn remove(&mut self, pos: Vec2, data: T) -> bool {
        if !self.boundary.contains(pos) {
            return false;
        }

        let Some(children) = self.children.as_deref_mut() else {
            if let Some(index) = self
                .points
                .iter()
                .position(|(p, d)| *d == data && *p == pos)
            {
                self.points.remove(index);
                return true;
            }
            return false;
        };

        let removed = children.iter_mut().any(|child| child.remove(pos, data));
        if removed {
            self.try_collapse();
        }
        removed
    }

    /// Relocate a point: a removal followed by an insert, so boundary growth
    /// and leaf collapse happen as side effects of each half.
    pub fn move_point(&mut self, old_pos: Vec2, new_pos: Vec2, data: T) -> bool {
        self.remove(old_pos, data);
        self.insert(new_pos, data)
    }

    /// Double the boundary toward the target point, keeping the existing tree
    /// intact as one quadrant of the new, larger root.
    fn grow(&mut self, target: Vec2) {
        let Rect { x, y, w, h } = self.boundary;
        let target_east = target.x >= x + w / 2.0;
        let target_south = target.y >= y + h / 2.0;

        let new_rect = match (target_east, target_south) {
            (false, false) => Rect::new(x - w, y - h, w * 2.0, h * 2.0),
            (true, false) => Rect::new(x, y - h, w * 2.0, h * 2.0),
            (false, true) => Rect::new(x - w, y, w * 2.0, h * 2.0),
            (true, true) => Rect::new(x, y, w * 2.0, h * 2.0),
        };

        let old_root = std::mem::replace(self, QuadTree::new(new_rect));

        let mut children = Box::new([
            QuadTree::new(Rect::new(new_rect.x, new_rect.y, w, h)),
            QuadTree::new(Rect::new(new_rect.x + w, new_rect.y, w, h)),
            QuadTree::new(Rect::new(new_rect.x, new_rect.y + h, w, h)),
            QuadTree::new(Rect::new(new_rect.x + w, new_rect.y + h, w, h)),
        ]);

        // Slot the old tree into the quadrant matching its boundary.
        if let Some(slot) = children
            .iter_mut()
            .find(|c| c.boundary.x == x && c.boundary.y == y)
        {
            *slot = old_root;
        }

        self.children = Some(children);
    }

    fn try_collapse(&mut self) {
        let all_empty_leaves = self
            .children
            .as_deref()
            .is_some_and(|c| c.iter().all(|n| n.children.is_none() && n.points.is_empty()));
        if all_empty_leaves {
            self.children = None;
        }
    }

    /// Collect all data whose point lies within the given rectangle.
    ///
    /// A data value appears once per indexed point; callers that index
    /// several points under one value must de-duplicate.
    pub fn query(&self, range: Rect) -> Vec<T> {
        let mut found = Vec::new();
        self.query_into(range, &mut found);
        found
    }

    fn query_into(&self, range: Rect, found: &mut Vec<T>) {
        if !self.boundary.intersects(&range) {
            return;
        }

        for (pos, data) in &self.points {
            if range.contains(*pos) {
                found.push(*data);
            }
        }

        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.query_into(range, found);
            }
        }
    }

    /// Reset to a single empty leaf, discarding all points and children.
    pub fn clear(&mut self) {
        self.points.clear();
        self.children = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn everything() -> Rect {
        Rect::new(-1e7, -1e7, 2e7, 2e7)
    }

    #[test]
    fn test_insert_and_query() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        for i in 0..10u32 {
            tree.insert(Vec2::new(i as f32 * 10.0, i as f32 * 10.0), i);
        }

        let found = tree.query(Rect::new(0.0, 0.0, 45.0, 45.0));
        assert_eq!(found.len(), 5);
        for i in 0..5 {
            assert!(found.contains(&i));
        }
    }

    #[test]
    fn test_query_matches_linear_scan() {
        let mut tree = QuadTree::new(Rect::new(-50.0, -50.0, 100.0, 100.0));
        let mut points = Vec::new();
        let mut seed = 1u32;
        for i in 0..200u32 {
            // Small LCG, keeps the test deterministic without a rand dep.
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let x = (seed % 400) as f32 - 200.0;
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let y = (seed % 400) as f32 - 200.0;
            points.push((Vec2::new(x, y), i));
            tree.insert(Vec2::new(x, y), i);
        }

        let range = Rect::new(-120.0, -60.0, 150.0, 170.0);
        let mut found = tree.query(range);
        let mut expected: Vec<u32> = points
            .iter()
            .filter(|(p, _)| range.contains(*p))
            .map(|(_, d)| *d)
            .collect();
        found.sort_unstable();
        expected.sort_unstable();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_grows_to_cover_far_points() {
        let mut tree = QuadTree::new(Rect::new(-1000.0, -1000.0, 2000.0, 2000.0));
        assert!(tree.insert(Vec2::new(5000.0, 5000.0), 7u32));

        assert!(tree.boundary().contains(Vec2::new(5000.0, 5000.0)));
        let found = tree.query(Rect::new(4900.0, 4900.0, 200.0, 200.0));
        assert_eq!(found, vec![7]);
    }

    #[test]
    fn test_grow_preserves_existing_points() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 10.0, 10.0));
        for i in 0..8u32 {
            tree.insert(Vec2::new(1.0 + i as f32, 1.0), i);
        }
        tree.insert(Vec2::new(-500.0, -500.0), 99);

        assert_eq!(tree.query(everything()).len(), 9);
        assert_eq!(tree.query(Rect::new(0.0, 0.0, 10.0, 10.0)).len(), 8);
    }

    #[test]
    fn test_identical_points_overflow_without_subdividing_forever() {
        let mut tree = QuadTree::new(Rect::new(-1000.0, -1000.0, 2000.0, 2000.0));
        for i in 0..20u32 {
            tree.insert(Vec2::new(10.0, 10.0), i);
        }

        let found = tree.query(Rect::new(5.0, 5.0, 10.0, 10.0));
        assert_eq!(found.len(), 20);
    }

    #[test]
    fn test_remove_and_collapse() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        for i in 0..8u32 {
            tree.insert(Vec2::new(i as f32 * 10.0 + 5.0, 5.0), i);
        }
        for i in 0..8u32 {
            assert!(tree.remove(Vec2::new(i as f32 * 10.0 + 5.0, 5.0), i));
        }

        assert!(tree.query(everything()).is_empty());
        // Fully emptied children collapse back into a leaf.
        assert!(tree.children.is_none());
    }

    #[test]
    fn test_remove_matches_data_not_just_position() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        tree.insert(Vec2::new(5.0, 5.0), 1u32);
        tree.insert(Vec2::new(5.0, 5.0), 2u32);

        assert!(!tree.remove(Vec2::new(5.0, 5.0), 3));
        assert!(tree.remove(Vec2::new(5.0, 5.0), 1));
        assert_eq!(tree.query(everything()), vec![2]);
    }

    #[test]
    fn test_move_point() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        tree.insert(Vec2::new(10.0, 10.0), 1u32);
        tree.move_point(Vec2::new(10.0, 10.0), Vec2::new(90.0, 90.0), 1);

        assert!(tree.query(Rect::new(0.0, 0.0, 20.0, 20.0)).is_empty());
        assert_eq!(tree.query(Rect::new(80.0, 80.0, 20.0, 20.0)), vec![1]);
    }

    #[test]
    fn test_clear() {
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        for i in 0..50u32 {
            tree.insert(Vec2::new((i % 10) as f32 * 10.0, (i / 10) as f32 * 10.0), i);
        }
        tree.clear();
        assert!(tree.query(everything()).is_empty());
    }
}
