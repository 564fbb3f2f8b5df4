//! Tile adjacency graph.
//!
//! Tiles live in an arena indexed by [`TileId`]; edges are stored once per
//! unordered tile pair and hold every point match observed between the two
//! tiles. Each point match keeps the orientation it was measured in
//! (moving → fixed) so either endpoint can build its own correspondences.

mod builder;
mod components;


pub use builder::{PairwiseMatch, TileGraphBuilder, dataset_dimensionality};
pub use components::{connected_components, largest_component, size_histogram};

use glam::DVec3;
use hashbrown::HashMap;

use crate::geometry::{Dimensionality, Interval};
use crate::model::{Correspondence, TileModel};

/// Position of a tile in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(pub usize);

/// Position of an edge in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);

/// A point in tile-local coordinates together with its current world
/// position under the owning tile's model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub local: DVec3,
    pub world: DVec3,
}

impl Point {
    pub fn new(local: DVec3) -> Self {
        Self {
            local,
            world: local,
        }
    }
}

/// Pair of corresponding points: `p1` lives in the moving tile, `p2` is the
/// same physical location expressed in the fixed tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch {
    pub p1: Point,
    pub p2: Point,
    pub weight: f64,
}

impl PointMatch {
    /// Current world-space distance between the two points.
    pub fn distance(&self) -> f64 {
        (self.p1.world - self.p2.world).length()
    }
}

/// Point match attached to an edge, oriented moving → fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeMatch {
    pub moving: TileId,
    pub point_match: PointMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Endpoints, smaller id first.
    pub tiles: (TileId, TileId),
    pub matches: Vec<EdgeMatch>,
}

impl Edge {
    pub fn other(&self, id: TileId) -> TileId {
        if self.tiles.0 == id {
            self.tiles.1
        } else {
            debug_assert_eq!(self.tiles.1, id);
            self.tiles.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Dataset-wide tile index.
    pub index: usize,
    pub model: TileModel,
    pub edges: Vec<EdgeId>,
    /// Local bounds of every sub-tile of this tile that took part in a match.
    pub matched_subtiles: Vec<Interval>,
}

#[derive(Debug, Clone)]
pub struct TileGraph {
    dim: Dimensionality,
    tiles: Vec<Tile>,
    tile_ids: HashMap<usize, TileId>,
    edges: Vec<Edge>,
    edge_ids: HashMap<(TileId, TileId), EdgeId>,
}

impl TileGraph {
    pub fn new(dim: Dimensionality) -> Self {
        Self {
            dim,
            tiles: Vec::new(),
            tile_ids: HashMap::new(),
            edges: Vec::new(),
            edge_ids: HashMap::new(),
        }
    }

    pub fn dimensionality(&self) -> Dimensionality {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn tile(&self, id: TileId) -> &Tile {
        &self.tiles[id.0]
    }

    pub fn tile_mut(&mut self, id: TileId) -> &mut Tile {
        &mut self.tiles[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn id_of(&self, index: usize) -> Option<TileId> {
        self.tile_ids.get(&index).copied()
    }

    pub fn tile_ids(&self) -> impl Iterator<Item = TileId> + '_ {
        (0..self.tiles.len()).map(TileId)
    }

    /// Register a tile, returning the existing id if the index is known.
    pub fn add_tile(&mut self, index: usize, model: TileModel) -> TileId {
        if let Some(&id) = self.tile_ids.get(&index) {
            return id;
        }
        assert_eq!(
            model.dimensionality(),
            self.dim,
            "tile {} model does not match the graph dimensionality",
            index
        );
        let id = TileId(self.tiles.len());
        self.tiles.push(Tile {
            index,
            model,
            edges: Vec::new(),
            matched_subtiles: Vec::new(),
        });
        self.tile_ids.insert(index, id);
        id
    }

    /// Connect two tiles. A pair is connected at most once; later calls
    /// return the existing edge.
    pub fn connect(&mut self, a: TileId, b: TileId) -> EdgeId {
        assert_ne!(a, b, "a tile cannot be connected to itself");
        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(&id) = self.edge_ids.get(&key) {
            return id;
        }
        let id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            tiles: key,
            matches: Vec::new(),
        });
        self.edge_ids.insert(key, id);
        self.tiles[a.0].edges.push(id);
        self.tiles[b.0].edges.push(id);
        id
    }

    pub fn edge_between(&self, a: TileId, b: TileId) -> Option<EdgeId> {
        let key = if a < b { (a, b) } else { (b, a) };
        self.edge_ids.get(&key).copied()
    }

    /// Attach a point match measured from `moving` into `fixed`.
    pub fn add_point_match(&mut self, moving: TileId, fixed: TileId, point_match: PointMatch) {
        let edge = self.connect(moving, fixed);
        self.edges[edge.0].matches.push(EdgeMatch {
            moving,
            point_match,
        });
    }

    pub fn neighbors(&self, id: TileId) -> impl Iterator<Item = TileId> + '_ {
        self.tiles[id.0]
            .edges
            .iter()
            .map(move |&e| self.edges[e.0].other(id))
    }

    /// Number of point matches incident to a tile, in either orientation.
    pub fn match_count(&self, id: TileId) -> usize {
        self.tiles[id.0]
            .edges
            .iter()
            .map(|&e| self.edges[e.0].matches.len())
            .sum()
    }

    /// Correspondences for fitting the tile's model: each of its own local
    /// points paired with the neighbour's current world position. Only
    /// neighbours accepted by `include` contribute.
    pub fn correspondences(
        &self,
        id: TileId,
        mut include: impl FnMut(TileId) -> bool,
    ) -> Vec<Correspondence> {
        let mut out = Vec::new();
        for &edge_id in &self.tiles[id.0].edges {
            let edge = &self.edges[edge_id.0];
            if !include(edge.other(id)) {
                continue;
            }
            for m in &edge.matches {
                let pm = &m.point_match;
                let (own, other) = if m.moving == id {
                    (&pm.p1, &pm.p2)
                } else {
                    (&pm.p2, &pm.p1)
                };
                out.push(Correspondence {
                    source: own.local,
                    target: other.world,
                    weight: pm.weight,
                });
            }
        }
        out
    }

    /// Move the world position of every point owned by the tile towards
    /// its model's prediction by `amount` (1.0 = all the way).
    pub fn apply_model(&mut self, id: TileId, amount: f64) {
        let Self { tiles, edges, .. } = self;
        let tile = &tiles[id.0];
        for &edge_id in &tile.edges {
            for m in edges[edge_id.0].matches.iter_mut() {
                let point = if m.moving == id {
                    &mut m.point_match.p1
                } else {
                    &mut m.point_match.p2
                };
                let target = tile.model.apply(point.local);
                point.world += (target - point.world) * amount;
            }
        }
    }
}
