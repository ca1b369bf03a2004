use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{BindingFilter, BindingsRepo, RepoError},
    domain::{
        bindings::{Binding, BindingCount, NewBinding},
        types::{BindType, SectionId, TypeId},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct BindingRow {
    section_id: i64,
    type_id: i64,
    bind_type: String,
    query: String,
}

impl TryFrom<BindingRow> for Binding {
    type Error = RepoError;

    fn try_from(row: BindingRow) -> Result<Self, Self::Error> {
        let bind_type = BindType::try_from(row.bind_type.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown bind type `{}`", row.bind_type))
        })?;

        Ok(Self {
            section_id: row.section_id,
            type_id: row.type_id,
            bind_type,
            query: row.query,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BindingCountRow {
    section_id: i64,
    bindings: i64,
}

#[async_trait]
impl BindingsRepo for PostgresRepositories {
    async fn list_bindings(
        &self,
        section_id: SectionId,
        filter: &BindingFilter,
    ) -> Result<Vec<Binding>, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT section_id, type_id, bind_type, query FROM bindings WHERE section_id = ",
        );
        qb.push_bind(section_id);

        if let Some(type_id) = filter.type_id {
            qb.push(" AND type_id = ");
            qb.push_bind(type_id);
        }

        if let Some(kinds) = filter.kinds.as_ref() {
            let kinds: Vec<&str> = kinds.iter().map(|kind| kind.as_str()).collect();
            qb.push(" AND bind_type = ANY(");
            qb.push_bind(kinds);
            qb.push(")");
        }

        qb.push(" ORDER BY id");

        let rows = qb
            .build_query_as::<BindingRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(Binding::try_from).collect()
    }

    async fn clear_bindings(&self, section_id: SectionId) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM bindings WHERE section_id = $1")
            .bind(section_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn replace_bindings(
        &self,
        section_id: SectionId,
        bindings_by_type: BTreeMap<TypeId, Vec<NewBinding>>,
    ) -> Result<Vec<Binding>, RepoError> {
        let mut bindings = Vec::new();
        for (type_id, entries) in bindings_by_type {
            for entry in entries {
                let binding = Binding::new(section_id, type_id, entry.bind_type, entry.query)
                    .map_err(|err| RepoError::invalid_input(err.to_string()))?;
                bindings.push(binding);
            }
        }

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM bindings WHERE section_id = $1")
            .bind(section_id)
            .execute(tx.as_mut())
            .await
            .map_err(map_sqlx_error)?;

        for binding in &bindings {
            sqlx::query(
                r#"
                INSERT INTO bindings (section_id, type_id, bind_type, query)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(binding.section_id)
            .bind(binding.type_id)
            .bind(binding.bind_type.as_str())
            .bind(&binding.query)
            .execute(tx.as_mut())
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(bindings)
    }

    async fn binding_counts(&self) -> Result<Vec<BindingCount>, RepoError> {
        let rows = sqlx::query_as::<_, BindingCountRow>(
            r#"
            SELECT section_id, COUNT(*) AS bindings
            FROM bindings
            GROUP BY section_id
            ORDER BY section_id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                let bindings = u64::try_from(row.bindings)
                    .map_err(|_| RepoError::from_persistence("count exceeds supported range"))?;
                Ok(BindingCount {
                    section_id: row.section_id,
                    bindings,
                })
            })
            .collect()
    }
}
