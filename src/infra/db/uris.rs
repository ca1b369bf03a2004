use async_trait::async_trait;

use crate::{
    application::repos::{RepoError, TrackedUri, UriTrackingRepo, uri_hash},
    domain::{
        targets::normalize_uri,
        types::{ItemId, LocaleId},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TrackedUriRow {
    uri: String,
    locale: Option<String>,
}

impl From<TrackedUriRow> for TrackedUri {
    fn from(row: TrackedUriRow) -> Self {
        Self {
            uri: row.uri,
            locale: LocaleId::parse_optional(row.locale.as_deref()),
        }
    }
}

#[async_trait]
impl UriTrackingRepo for PostgresRepositories {
    async fn record_uri(
        &self,
        item_id: ItemId,
        uri: &str,
        locale: Option<LocaleId>,
    ) -> Result<(), RepoError> {
        if uri.trim().is_empty() {
            return Err(RepoError::invalid_input("uri must not be blank"));
        }

        let uri = normalize_uri(uri);
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let uri_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tracked_uris (uri_hash, uri, locale)
            VALUES ($1, $2, $3)
            ON CONFLICT (uri_hash)
            DO UPDATE SET locale = EXCLUDED.locale, updated_at = now()
            RETURNING id
            "#,
        )
        .bind(uri_hash(&uri))
        .bind(&uri)
        .bind(locale.as_ref().map(LocaleId::as_str))
        .fetch_one(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO tracked_uri_items (uri_id, item_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(uri_id)
        .bind(item_id)
        .execute(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn uris_for(&self, item_id: ItemId) -> Result<Vec<TrackedUri>, RepoError> {
        let rows = sqlx::query_as::<_, TrackedUriRow>(
            r#"
            SELECT u.uri, u.locale
              FROM tracked_uris u
              JOIN tracked_uri_items i ON i.uri_id = u.id
             WHERE i.item_id = $1
             ORDER BY u.id
            "#,
        )
        .bind(item_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TrackedUri::from).collect())
    }

    async fn consume_uris(&self, item_id: ItemId, uris: &[String]) -> Result<u64, RepoError> {
        if uris.is_empty() {
            return Ok(0);
        }
        let hashes: Vec<String> = uris.iter().map(|uri| uri_hash(uri)).collect();

        // Deleting the URI record cascades to every item link.
        let result = sqlx::query(
            r#"
            DELETE FROM tracked_uris u
             USING tracked_uri_items i
             WHERE i.uri_id = u.id
               AND i.item_id = $1
               AND u.uri_hash = ANY($2)
            "#,
        )
        .bind(item_id)
        .bind(&hashes)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn forget_uri(&self, uri: &str) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM tracked_uris WHERE uri_hash = $1")
            .bind(uri_hash(uri))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
