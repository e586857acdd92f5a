pub mod point;
pub mod project;

pub use point::{spans_from_value, Connection, NewPoint, Point};
pub use project::{
    is_placeholder_id, placeholder_id, validate_points, Project, ProjectDefect, ProjectDraft,
    ValidationError, LOCAL_ID_PREFIX,
};
