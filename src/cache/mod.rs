//! Device-local project cache, keyed by user.

use std::future::Future;

use anyhow::Result;

use crate::{db::Database, models::Project};

pub trait ProjectCache: Send + Sync + 'static {
    /// Empty when the user has no cached projects yet.
    fn load(&self, user_id: &str) -> impl Future<Output = Result<Vec<Project>>> + Send;

    fn save(&self, user_id: &str, projects: &[Project]) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub struct SqliteProjectCache {
    db: Database,
}

impl SqliteProjectCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ProjectCache for SqliteProjectCache {
    async fn load(&self, user_id: &str) -> Result<Vec<Project>> {
        Ok(self
            .db
            .load_cached_projects(user_id)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, user_id: &str, projects: &[Project]) -> Result<()> {
        self.db.save_cached_projects(user_id, projects).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_user_loads_empty() {
        let cache = SqliteProjectCache::new(Database::in_memory().unwrap());
        assert!(cache.load("nobody").await.unwrap().is_empty());
        cache.save("nobody", &[]).await.unwrap();
        assert!(cache.load("nobody").await.unwrap().is_empty());
    }
}
