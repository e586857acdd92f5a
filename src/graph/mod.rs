pub mod distance;
pub mod editor;

pub use distance::{edges, resolve_parent, total_distance, Edge, EdgeKind, ParentEdge};
pub use editor::{normalize_spans, GraphError, PointGraph, RemovedPoint};
