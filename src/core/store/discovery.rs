use tracing::debug;

use super::Store;
use crate::core::error::Result;

impl Store {
    /// Runs a slug discovery query and returns the first column of every row.
    pub async fn query_slugs(&self, query: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        debug!("executing the following query to get slugs:\n{}", query);
        let mut stmt = db.prepare(query)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut slugs = Vec::new();
        for row in rows {
            slugs.push(row?);
        }
        Ok(slugs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{ALL_SLUGS_QUERY, top_slugs_query};

    async fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .lock()
            .await
            .execute_batch(
                "create table mv_subprojects(id int, project_slug text);
                 insert into mv_subprojects values (1, 'kube'), (2, 'linux'), (3, ''), (4, null), (5, 'kube');
                 create table activities(id int, segment_id int, timestamp text);
                 insert into activities values
                   (1, 2, datetime('now', '-1 day')),
                   (2, 2, datetime('now', '-2 days')),
                   (3, 1, datetime('now', '-3 days')),
                   (4, 1, datetime('now', '-2 years'));",
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn all_slugs_skips_blank_and_null() {
        let store = seeded().await;
        let mut slugs = store.query_slugs(ALL_SLUGS_QUERY).await.unwrap();
        slugs.sort();
        assert_eq!(slugs, vec!["kube", "linux"]);
    }

    #[tokio::test]
    async fn top_slugs_orders_by_recent_activity() {
        let store = seeded().await;
        let slugs = store.query_slugs(&top_slugs_query(1)).await.unwrap();
        assert_eq!(slugs, vec!["linux"]);
    }

    #[tokio::test]
    async fn bad_query_is_an_error() {
        let store = seeded().await;
        assert!(store.query_slugs("select nope from nowhere").await.is_err());
    }
}
