pub mod project_cache;
pub mod projects;
