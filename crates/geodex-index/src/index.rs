//! Spatial-temporal index over bounding volumes.

use crate::{BoundingVolume, GeoIndexError, Result};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeMap;

/// A single indexed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry<P> {
    /// Unique key assigned at insertion.
    pub key: u64,
    /// Footprint of the entry in `(x, y, t)`.
    pub volume: BoundingVolume,
    /// Opaque payload, usually a file path.
    pub payload: P,
}

/// Envelope stored in the R-tree; payloads live in the entry map.
#[derive(Debug, Clone, Copy)]
struct Node {
    key: u64,
    envelope: AABB<[f64; 3]>,
}

impl RTreeObject for Node {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn to_aabb(volume: &BoundingVolume) -> AABB<[f64; 3]> {
    let (lower, upper) = volume.corners();
    AABB::from_corners(lower, upper)
}

/// An append-mostly index answering "which entries overlap this volume".
///
/// The R-tree returns candidates using closed intervals; the exact
/// half-open test from [`BoundingVolume::intersects`] is applied afterwards,
/// so adjacent entries are never reported for a query touching only their
/// shared edge.
#[derive(Debug)]
pub struct SpatialIndex<P> {
    tree: RTree<Node>,
    entries: BTreeMap<u64, IndexEntry<P>>,
    bounds: Option<BoundingVolume>,
}

impl<P> Default for SpatialIndex<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SpatialIndex<P> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            entries: BTreeMap::new(),
            bounds: None,
        }
    }

    /// Insert an entry. Keys must be unique.
    pub fn insert(&mut self, key: u64, volume: BoundingVolume, payload: P) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(GeoIndexError::DuplicateKey { key });
        }

        self.tree.insert(Node {
            key,
            envelope: to_aabb(&volume),
        });
        self.entries.insert(key, IndexEntry { key, volume, payload });
        self.bounds = Some(match self.bounds {
            Some(bounds) => bounds.union(&volume),
            None => volume,
        });

        Ok(())
    }

    /// Return every entry intersecting `query`, ordered by key.
    pub fn query(&self, query: &BoundingVolume) -> Vec<&IndexEntry<P>> {
        if query.is_degenerate() {
            return Vec::new();
        }

        let mut keys: Vec<u64> = self
            .tree
            .locate_in_envelope_intersecting(&to_aabb(query))
            .map(|node| node.key)
            .collect();
        keys.sort_unstable();

        keys.into_iter()
            .filter_map(|key| self.entries.get(&key))
            .filter(|entry| entry.volume.intersects(query))
            .collect()
    }

    /// Union of all stored volumes, `None` for an empty index.
    pub fn bounds(&self) -> Option<BoundingVolume> {
        self.bounds
    }

    /// Look up an entry by key.
    pub fn get(&self, key: u64) -> Option<&IndexEntry<P>> {
        self.entries.get(&key)
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry<P>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
