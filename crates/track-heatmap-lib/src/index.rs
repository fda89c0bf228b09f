//! Spatial lookup of segments by geographic bounds
//!
//! On-demand tile builds only need the segments near one tile. [`SpatialRangeSource`] is the
//! seam the orchestrator queries; [`SegmentIndex`] answers it with a quadtree, while plain
//! slices answer it with a linear scan.

use crate::Segment;
use geo::{Coord, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum depth of the quadtree
///
/// At depth 16 a node spans about 0.005° of longitude, roughly one zoom-16 tile.
const MAX_DEPTH: u32 = 16;

/// Anything that can return the segments whose bounding boxes intersect `bounds`
///
/// Bounds use `x` as longitude and `y` as latitude; edges are inclusive.
pub trait SpatialRangeSource {
    fn segments_in(&self, bounds: Rect<f64>) -> Vec<Segment>;
}

impl SpatialRangeSource for [Segment] {
    fn segments_in(&self, bounds: Rect<f64>) -> Vec<Segment> {
        self.iter()
            .filter(|segment| rects_intersect(segment.bounding_box(), bounds))
            .copied()
            .collect()
    }
}

impl SpatialRangeSource for Vec<Segment> {
    fn segments_in(&self, bounds: Rect<f64>) -> Vec<Segment> {
        self.as_slice().segments_in(bounds)
    }
}

/// World-rooted quadtree over (longitude, latitude)
///
/// Each segment is stored at the deepest node whose bounds fully contain the segment's
/// bounding box, so short segments sink towards the leaves and long ones stay near the root.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentIndex {
    root: IndexNode,
    len: usize,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct IndexNode {
    bounding_box: Rect<f64>,
    level: u32,
    segments: Vec<Segment>,
    /// NW, NE, SW, SE once subdivided
    children: Option<Box<[IndexNode; 4]>>,
}

impl Default for SegmentIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentIndex {
    /// Create an empty index covering the whole world
    pub fn new() -> Self {
        Self {
            root: IndexNode::new_root(),
            len: 0,
        }
    }

    /// Build an index from a batch of segments
    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        let mut index = Self::new();
        index.extend(segments);
        index
    }

    pub fn insert(&mut self, segment: Segment) {
        self.root.insert(segment);
        self.len += 1;
    }

    pub fn extend(&mut self, segments: impl IntoIterator<Item = Segment>) {
        for segment in segments {
            self.insert(segment);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Segments whose bounding boxes intersect `bounds`
    pub fn query(&self, bounds: Rect<f64>) -> Vec<Segment> {
        #[cfg(feature = "profiling")]
        profiling::scope!("SegmentIndex::query");

        let mut results = Vec::new();
        self.root.query(bounds, &mut results);
        results
    }
}

impl SpatialRangeSource for SegmentIndex {
    fn segments_in(&self, bounds: Rect<f64>) -> Vec<Segment> {
        self.query(bounds)
    }
}

impl IndexNode {
    fn new_root() -> Self {
        Self::new_child(
            Rect::new(
                Coord {
                    x: -180.0,
                    y: -90.0,
                },
                Coord { x: 180.0, y: 90.0 },
            ),
            0,
        )
    }

    fn new_child(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            segments: Vec::new(),
            children: None,
        }
    }

    fn subdivide(&mut self) {
        if self.children.is_some() {
            return;
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let level = self.level + 1;

        let nw = Self::new_child(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            level,
        );
        let ne = Self::new_child(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            level,
        );
        let sw = Self::new_child(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            level,
        );
        let se = Self::new_child(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            level,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));
    }

    fn insert(&mut self, segment: Segment) {
        let bbox = segment.bounding_box();
        if self.level < MAX_DEPTH {
            self.subdivide();
            let target = self.children.as_mut().and_then(|children| {
                children
                    .iter_mut()
                    .find(|child| rect_contains(child.bounding_box, bbox))
            });
            if let Some(child) = target {
                child.insert(segment);
                return;
            }
        }
        // Straddles a child boundary, lies outside the world bounds, or the tree is full depth
        self.segments.push(segment);
    }

    fn query(&self, bounds: Rect<f64>, results: &mut Vec<Segment>) {
        // The root keeps out-of-world segments, so it is always searched
        if self.level > 0 && !rects_intersect(self.bounding_box, bounds) {
            return;
        }

        results.extend(
            self.segments
                .iter()
                .filter(|segment| rects_intersect(segment.bounding_box(), bounds))
                .copied(),
        );

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(bounds, results);
            }
        }
    }
}

/// Inclusive intersection test between two rectangles
#[inline]
fn rects_intersect(a: Rect<f64>, b: Rect<f64>) -> bool {
    let (amin, amax) = (a.min(), a.max());
    let (bmin, bmax) = (b.min(), b.max());
    !(amax.x < bmin.x || amin.x > bmax.x || amax.y < bmin.y || amin.y > bmax.y)
}

/// Whether `inner` lies entirely within `outer`
#[inline]
fn rect_contains(outer: Rect<f64>, inner: Rect<f64>) -> bool {
    let (omin, omax) = (outer.min(), outer.max());
    let (imin, imax) = (inner.min(), inner.max());
    imin.x >= omin.x && imin.y >= omin.y && imax.x <= omax.x && imax.y <= omax.y
}
