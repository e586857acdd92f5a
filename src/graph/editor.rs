use thiserror::Error;

use super::distance::{edges, point_lookup, resolve_parent, total_distance, Edge};
use crate::models::{Connection, NewPoint, Point};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("point {0} does not exist")]
    UnknownPoint(String),

    #[error("connection {0} does not exist")]
    UnknownConnection(String),

    #[error("a connection cannot start and end at point {0}")]
    SelfLoop(String),
}

/// Result of removing a point from the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedPoint {
    pub point: Point,
    /// Edges that existed before the removal and touched the point.
    pub removed_edges: Vec<Edge>,
}

/// Working copy of a project's graph plus the editing cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointGraph {
    points: Vec<Point>,
    connections: Vec<Connection>,
    /// Explicitly selected attachment point. `None` means "the last point".
    active_point_id: Option<String>,
}

impl PointGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(points: Vec<Point>, connections: Vec<Connection>) -> Self {
        Self {
            points,
            connections,
            active_point_id: None,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn into_parts(self) -> (Vec<Point>, Vec<Connection>) {
        (self.points, self.connections)
    }

    /// Swap in a new graph, keeping the selected point if it survived.
    pub fn replace_parts(&mut self, points: Vec<Point>, connections: Vec<Connection>) {
        self.points = points;
        self.connections = connections;
        if let Some(id) = self.active_point_id.as_deref() {
            if self.point(id).is_none() {
                self.active_point_id = None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_distance(&self) -> f64 {
        total_distance(&self.points, &self.connections)
    }

    pub fn edges(&self) -> Vec<Edge> {
        edges(&self.points, &self.connections)
    }

    pub fn point(&self, point_id: &str) -> Option<&Point> {
        self.points.iter().find(|p| p.id == point_id)
    }

    /// The point the next appended point will attach to.
    pub fn active_point(&self) -> Option<&Point> {
        match self.active_point_id.as_deref() {
            Some(id) => self.point(id).or_else(|| self.points.last()),
            None => self.points.last(),
        }
    }

    /// Append a point attached to the active point, then make it active.
    pub fn append_point(&mut self, new_point: NewPoint) -> &Point {
        let parent = self.active_point().map(|p| p.id.clone());
        self.push(new_point.into_point(parent, false))
    }

    /// Append a point that roots a new branch.
    pub fn start_branch(&mut self, new_point: NewPoint) -> &Point {
        self.push(new_point.into_point(None, true))
    }

    fn push(&mut self, point: Point) -> &Point {
        self.active_point_id = None;
        self.points.push(point);
        &self.points[self.points.len() - 1]
    }

    pub fn set_active_point(&mut self, point_id: &str) -> Result<(), GraphError> {
        if self.point(point_id).is_none() {
            return Err(GraphError::UnknownPoint(point_id.to_string()));
        }
        self.active_point_id = Some(point_id.to_string());
        Ok(())
    }

    pub fn reset_active_point(&mut self) {
        self.active_point_id = None;
    }

    /// Remove the most recently appended point.
    ///
    /// When the removed point was active, drawing continues from its resolved
    /// parent, or from the new last point when it had none.
    pub fn undo_last_point(&mut self) -> Option<RemovedPoint> {
        let last_id = self.points.last()?.id.clone();
        self.remove_point(&last_id).ok()
    }

    /// Remove any point and heal the chain around it.
    ///
    /// Children of the removed point (explicit or sequential) are re-attached
    /// to its resolved parent; when it had no parent they become branch roots.
    /// Extra connections touching the point are dropped.
    pub fn remove_point(&mut self, point_id: &str) -> Result<RemovedPoint, GraphError> {
        let index = self
            .points
            .iter()
            .position(|p| p.id == point_id)
            .ok_or_else(|| GraphError::UnknownPoint(point_id.to_string()))?;

        let removed_edges: Vec<Edge> = self
            .edges()
            .into_iter()
            .filter(|edge| edge.touches(point_id))
            .collect();

        let (parent_id, children) = {
            let lookup = point_lookup(&self.points);
            let parent_id = resolve_parent(&self.points, index, &lookup)
                .parent()
                .map(|p| p.id.clone());
            let children: Vec<usize> = (0..self.points.len())
                .filter(|&i| i != index)
                .filter(|&i| {
                    resolve_parent(&self.points, i, &lookup)
                        .parent()
                        .is_some_and(|p| p.id == point_id)
                })
                .collect();
            (parent_id, children)
        };

        let was_active = self
            .active_point()
            .is_some_and(|active| active.id == point_id);

        for child in children {
            let point = &mut self.points[child];
            match &parent_id {
                Some(parent) => point.connected_from = Some(parent.clone()),
                None => {
                    point.connected_from = None;
                    point.is_gap = true;
                }
            }
        }

        let point = self.points.remove(index);
        self.connections.retain(|c| !c.touches(point_id));

        if was_active {
            self.active_point_id = parent_id;
        }

        Ok(RemovedPoint {
            point,
            removed_edges,
        })
    }

    pub fn add_connection(
        &mut self,
        from_id: &str,
        to_id: &str,
        spans: u32,
    ) -> Result<&Connection, GraphError> {
        if from_id == to_id {
            return Err(GraphError::SelfLoop(from_id.to_string()));
        }
        for id in [from_id, to_id] {
            if self.point(id).is_none() {
                return Err(GraphError::UnknownPoint(id.to_string()));
            }
        }
        self.connections.push(Connection::new(from_id, to_id, spans));
        Ok(&self.connections[self.connections.len() - 1])
    }

    pub fn remove_connection(&mut self, connection_id: &str) -> Result<Connection, GraphError> {
        let index = self
            .connections
            .iter()
            .position(|c| c.id == connection_id)
            .ok_or_else(|| GraphError::UnknownConnection(connection_id.to_string()))?;
        Ok(self.connections.remove(index))
    }

    pub fn set_point_spans(&mut self, point_id: &str, spans: u32) -> Result<(), GraphError> {
        let point = self.point_mut(point_id)?;
        point.spans = spans.max(1);
        Ok(())
    }

    pub fn set_connection_spans(
        &mut self,
        connection_id: &str,
        spans: u32,
    ) -> Result<(), GraphError> {
        let connection = self
            .connections
            .iter_mut()
            .find(|c| c.id == connection_id)
            .ok_or_else(|| GraphError::UnknownConnection(connection_id.to_string()))?;
        connection.spans = spans.max(1);
        Ok(())
    }

    pub fn set_point_description(
        &mut self,
        point_id: &str,
        description: Option<String>,
    ) -> Result<(), GraphError> {
        self.point_mut(point_id)?.description = description;
        Ok(())
    }

    /// Coerce every span multiplier to at least 1.
    pub fn normalize_spans(&mut self) {
        normalize_spans(&mut self.points, &mut self.connections);
    }

    fn point_mut(&mut self, point_id: &str) -> Result<&mut Point, GraphError> {
        self.points
            .iter_mut()
            .find(|p| p.id == point_id)
            .ok_or_else(|| GraphError::UnknownPoint(point_id.to_string()))
    }
}

pub fn normalize_spans(points: &mut [Point], connections: &mut [Connection]) {
    for point in points.iter_mut() {
        point.spans = point.effective_spans();
    }
    for connection in connections.iter_mut() {
        connection.spans = connection.effective_spans();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(graph: &PointGraph, index: usize) -> String {
        graph.points()[index].id.clone()
    }

    fn chain(len: usize) -> PointGraph {
        let mut graph = PointGraph::new();
        for i in 0..len {
            graph.append_point(NewPoint::at(0.0, 0.001 * i as f64));
        }
        graph
    }

    #[test]
    fn test_append_builds_explicit_chain() {
        let graph = chain(3);
        assert!(graph.points()[0].connected_from.is_none());
        assert_eq!(graph.points()[1].connected_from, Some(id_of(&graph, 0)));
        assert_eq!(graph.points()[2].connected_from, Some(id_of(&graph, 1)));
        assert_eq!(graph.active_point().map(|p| p.id.clone()), Some(id_of(&graph, 2)));
    }

    #[test]
    fn test_set_active_creates_branch() {
        let mut graph = chain(3);
        let root = id_of(&graph, 0);
        graph.set_active_point(&root).unwrap();

        let branch_id = graph.append_point(NewPoint::at(0.001, 0.0)).id.clone();
        let branch = graph.point(&branch_id).unwrap();
        assert_eq!(branch.connected_from.as_deref(), Some(root.as_str()));
        // Appending moves the cursor to the new point.
        assert_eq!(graph.active_point().unwrap().id, branch_id);
    }

    #[test]
    fn test_set_active_unknown_point() {
        let mut graph = chain(1);
        assert_eq!(
            graph.set_active_point("missing"),
            Err(GraphError::UnknownPoint("missing".into()))
        );
    }

    #[test]
    fn test_reset_active_returns_to_last_point() {
        let mut graph = chain(3);
        let first = id_of(&graph, 0);
        graph.set_active_point(&first).unwrap();
        graph.reset_active_point();
        assert_eq!(graph.active_point().unwrap().id, id_of(&graph, 2));
    }

    #[test]
    fn test_undo_moves_active_to_parent() {
        let mut graph = chain(3);
        let root = id_of(&graph, 0);
        graph.set_active_point(&root).unwrap();
        graph.append_point(NewPoint::at(0.001, 0.0));

        let removed = graph.undo_last_point().unwrap();
        assert_eq!(removed.point.connected_from.as_deref(), Some(root.as_str()));
        assert_eq!(graph.points().len(), 3);
        assert_eq!(graph.active_point().unwrap().id, root);
    }

    #[test]
    fn test_undo_of_root_falls_back_to_last_point() {
        let mut graph = chain(2);
        graph.start_branch(NewPoint::at(1.0, 1.0));
        graph.undo_last_point().unwrap();
        assert_eq!(graph.active_point().unwrap().id, id_of(&graph, 1));
    }

    #[test]
    fn test_undo_keeps_unrelated_selection() {
        let mut graph = chain(3);
        let middle = id_of(&graph, 1);
        graph.set_active_point(&middle).unwrap();
        graph.undo_last_point().unwrap();
        assert_eq!(graph.active_point().unwrap().id, middle);
    }

    #[test]
    fn test_undo_on_empty_graph() {
        let mut graph = PointGraph::new();
        assert!(graph.undo_last_point().is_none());
    }

    #[test]
    fn test_undo_drops_incident_connections() {
        let mut graph = chain(3);
        let (first, last) = (id_of(&graph, 0), id_of(&graph, 2));
        graph.add_connection(&last, &first, 2).unwrap();
        graph.undo_last_point().unwrap();
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_remove_leaf_subtracts_exactly_its_edges() {
        let mut graph = chain(4);
        let (first, last) = (id_of(&graph, 0), id_of(&graph, 3));
        graph.add_connection(&last, &first, 2).unwrap();
        graph.set_point_spans(&last, 3).unwrap();
        let before = graph.total_distance();

        let removed = graph.remove_point(&last).unwrap();
        let removed_total: f64 = removed.removed_edges.iter().map(Edge::weighted_m).sum();
        assert_eq!(removed.removed_edges.len(), 2);
        assert!((graph.total_distance() - (before - removed_total)).abs() < 1e-9);
    }

    #[test]
    fn test_remove_middle_heals_chain() {
        let mut graph = chain(3);
        let (first, middle, last) = (id_of(&graph, 0), id_of(&graph, 1), id_of(&graph, 2));
        graph.remove_point(&middle).unwrap();

        assert_eq!(graph.point(&last).unwrap().connected_from, Some(first));
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_remove_root_turns_children_into_roots() {
        let mut graph = chain(3);
        let (first, second) = (id_of(&graph, 0), id_of(&graph, 1));
        graph.remove_point(&first).unwrap();

        let child = graph.point(&second).unwrap();
        assert!(child.connected_from.is_none());
        assert!(child.is_gap);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_remove_gap_root_does_not_join_branches() {
        let mut graph = PointGraph::from_parts(
            vec![
                NewPoint::at(0.0, 0.0).into_point(None, false),
                NewPoint::at(0.0, 0.001).into_point(None, false),
                NewPoint::at(1.0, 1.0).into_point(None, true),
                NewPoint::at(1.0, 1.001).into_point(None, false),
            ],
            vec![],
        );
        let gap_root = id_of(&graph, 2);
        let tail = id_of(&graph, 3);
        graph.remove_point(&gap_root).unwrap();

        assert!(graph.point(&tail).unwrap().is_gap);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_connection_validation() {
        let mut graph = chain(2);
        let first = id_of(&graph, 0);
        assert_eq!(
            graph.add_connection(&first, &first, 1).unwrap_err(),
            GraphError::SelfLoop(first.clone())
        );
        assert_eq!(
            graph.add_connection(&first, "ghost", 1).unwrap_err(),
            GraphError::UnknownPoint("ghost".into())
        );

        let conn_id = graph.add_connection(&first, &id_of(&graph, 1), 1).unwrap().id.clone();
        graph.set_connection_spans(&conn_id, 0).unwrap();
        assert_eq!(graph.connections()[0].spans, 1);
        graph.remove_connection(&conn_id).unwrap();
        assert!(graph.remove_connection(&conn_id).is_err());
    }

    #[test]
    fn test_description_edit() {
        let mut graph = chain(1);
        let first = id_of(&graph, 0);
        graph
            .set_point_description(&first, Some("pole 14B".into()))
            .unwrap();
        assert_eq!(graph.point(&first).unwrap().description.as_deref(), Some("pole 14B"));
    }

    #[test]
    fn test_replace_parts_drops_vanished_selection() {
        let mut graph = chain(3);
        let middle = id_of(&graph, 1);
        graph.set_active_point(&middle).unwrap();

        let (points, connections) = chain(2).into_parts();
        graph.replace_parts(points, connections);
        assert_eq!(graph.active_point().map(|p| p.id.clone()), Some(id_of(&graph, 1)));

        let kept = graph.clone();
        let first = id_of(&graph, 0);
        graph.set_active_point(&first).unwrap();
        let (points, connections) = kept.into_parts();
        graph.replace_parts(points, connections);
        assert_eq!(graph.active_point().map(|p| p.id.clone()), Some(first));
    }

    #[test]
    fn test_normalize_spans_floors_at_one() {
        let mut graph = chain(2);
        let (a, b) = (id_of(&graph, 0), id_of(&graph, 1));
        graph.add_connection(&a, &b, 3).unwrap();
        let (mut points, mut connections) = graph.into_parts();
        points[1].spans = 0;
        connections[0].spans = 0;

        normalize_spans(&mut points, &mut connections);
        assert_eq!(points[1].spans, 1);
        assert_eq!(connections[0].spans, 1);
    }
}
