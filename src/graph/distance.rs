//! Pure distance derivation over `(points, connections)`.
//!
//! Every point contributes at most one tree edge, resolved with this
//! precedence:
//!
//! 1. [`ParentEdge::Explicit`]: `connectedFrom` names another point that exists.
//! 2. [`ParentEdge::SequentialFallback`]: otherwise the previous point in the
//!    array, unless this point is the first one or is flagged `isGap`.
//! 3. [`ParentEdge::NoParent`]: the point roots its own branch.
//!
//! Extra connections add one edge each when both endpoints exist. Edges that
//! cannot be resolved are skipped, never reported as errors.

use std::collections::HashMap;

use crate::geo::haversine_m;
use crate::models::{Connection, Point};

#[derive(Debug, Clone, Copy)]
pub enum ParentEdge<'a> {
    Explicit(&'a Point),
    SequentialFallback(&'a Point),
    NoParent,
}

impl<'a> ParentEdge<'a> {
    pub fn parent(&self) -> Option<&'a Point> {
        match self {
            ParentEdge::Explicit(parent) | ParentEdge::SequentialFallback(parent) => Some(parent),
            ParentEdge::NoParent => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Explicit,
    Sequential,
    Extra,
}

/// A resolved, length-contributing edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub kind: EdgeKind,
    pub from_id: String,
    pub to_id: String,
    pub spans: u32,
    /// Geometric length of a single span, in meters.
    pub length_m: f64,
}

impl Edge {
    pub fn weighted_m(&self) -> f64 {
        self.length_m * f64::from(self.spans)
    }

    pub fn touches(&self, point_id: &str) -> bool {
        self.from_id == point_id || self.to_id == point_id
    }
}

pub(crate) fn point_lookup(points: &[Point]) -> HashMap<&str, &Point> {
    points.iter().map(|p| (p.id.as_str(), p)).collect()
}

/// Resolve the tree edge of `points[index]`.
pub fn resolve_parent<'a>(
    points: &'a [Point],
    index: usize,
    lookup: &HashMap<&str, &'a Point>,
) -> ParentEdge<'a> {
    let point = &points[index];

    if let Some(parent_id) = point.connected_from.as_deref() {
        if parent_id != point.id {
            if let Some(parent) = lookup.get(parent_id) {
                return ParentEdge::Explicit(parent);
            }
        }
    }

    if index > 0 && !point.is_gap {
        return ParentEdge::SequentialFallback(&points[index - 1]);
    }

    ParentEdge::NoParent
}

/// Every edge that contributes to the total, tree edges first in point order.
///
/// Edges whose endpoints carry unusable coordinates are skipped, like
/// dangling references.
pub fn edges(points: &[Point], connections: &[Connection]) -> Vec<Edge> {
    let lookup = point_lookup(points);
    let mut out = Vec::with_capacity(points.len() + connections.len());

    for (index, point) in points.iter().enumerate() {
        let (kind, parent) = match resolve_parent(points, index, &lookup) {
            ParentEdge::Explicit(parent) => (EdgeKind::Explicit, parent),
            ParentEdge::SequentialFallback(parent) => (EdgeKind::Sequential, parent),
            ParentEdge::NoParent => continue,
        };
        let length_m = haversine_m(parent.coords(), point.coords());
        if !length_m.is_finite() {
            continue;
        }
        out.push(Edge {
            kind,
            from_id: parent.id.clone(),
            to_id: point.id.clone(),
            spans: point.effective_spans(),
            length_m,
        });
    }

    for connection in connections {
        let (Some(from), Some(to)) = (
            lookup.get(connection.from_id.as_str()),
            lookup.get(connection.to_id.as_str()),
        ) else {
            continue;
        };
        let length_m = haversine_m(from.coords(), to.coords());
        if !length_m.is_finite() {
            continue;
        }
        out.push(Edge {
            kind: EdgeKind::Extra,
            from_id: from.id.clone(),
            to_id: to.id.clone(),
            spans: connection.effective_spans(),
            length_m,
        });
    }

    out
}

/// Total span-weighted length of the graph, in meters.
pub fn total_distance(points: &[Point], connections: &[Connection]) -> f64 {
    edges(points, connections).iter().map(Edge::weighted_m).sum()
}
