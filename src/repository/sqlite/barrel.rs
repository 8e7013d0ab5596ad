use super::{BEGIN_WRITE, is_unique_violation, like_pattern};
use crate::{
    models::{
        barrel::{Barrel, BarrelStatus, Provider},
        from_millis, to_millis,
    },
    repository::{
        BarrelRepository, CreateBarrelParam, RepoError, RepoResult, SearchBarrelParam,
        SearchBarrelResult, UpdateBarrelParam,
    },
};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

const BARREL_COLUMNS: &str = "id, code, name, provider, status, created_at, updated_at";

#[derive(FromRow)]
struct BarrelRow {
    id: Uuid,
    code: String,
    name: String,
    provider: Provider,
    status: BarrelStatus,
    created_at: i64,
    updated_at: Option<i64>,
}

impl From<BarrelRow> for Barrel {
    fn from(row: BarrelRow) -> Self {
        Barrel {
            id: row.id,
            code: row.code,
            name: row.name,
            provider: row.provider,
            status: row.status,
            created_at: from_millis(row.created_at),
            updated_at: row.updated_at.map(from_millis),
        }
    }
}

#[derive(Clone)]
pub struct SqliteBarrelRepository {
    db: Arc<SqlitePool>,
}

impl SqliteBarrelRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, param: &SearchBarrelParam) {
        builder.push(" WHERE 1 = 1");

        if let Some(keyword) = param.keyword.as_deref().filter(|k| !k.is_empty()) {
            let pattern = like_pattern(keyword);
            builder.push(" AND (name LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR code LIKE ");
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }

        if !param.codes.is_empty() {
            builder.push(" AND code IN (");
            let mut codes = builder.separated(", ");
            for code in &param.codes {
                codes.push_bind(code.clone());
            }
            codes.push_unseparated(")");
        }

        if !param.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut statuses = builder.separated(", ");
            for status in &param.statuses {
                statuses.push_bind(*status);
            }
            statuses.push_unseparated(")");
        }

        if !param.providers.is_empty() {
            builder.push(" AND provider IN (");
            let mut providers = builder.separated(", ");
            for provider in &param.providers {
                providers.push_bind(*provider);
            }
            providers.push_unseparated(")");
        }
    }
}

#[async_trait]
impl BarrelRepository for SqliteBarrelRepository {
    async fn create_barrel(&self, param: CreateBarrelParam) -> RepoResult<Barrel> {
        let mut tx = self.db.begin_with(BEGIN_WRITE).await?;

        let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM barrel WHERE code = ?")
            .bind(&param.code)
            .fetch_one(&mut *tx)
            .await?;
        if taken > 0 {
            return Err(RepoError::Exists);
        }

        let inserted = sqlx::query(
            "INSERT INTO barrel (id, code, name, provider, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(param.id)
        .bind(&param.code)
        .bind(&param.name)
        .bind(param.provider)
        .bind(param.status)
        .bind(to_millis(param.created_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(RepoError::Exists),
            Err(err) => return Err(RepoError::Sqlx(err)),
        }
        tx.commit().await?;

        Ok(Barrel {
            id: param.id,
            code: param.code,
            name: param.name,
            provider: param.provider,
            status: param.status,
            created_at: param.created_at,
            updated_at: None,
        })
    }

    async fn find_barrel(&self, id: Uuid) -> RepoResult<Barrel> {
        sqlx::query_as::<_, BarrelRow>(&format!(
            "SELECT {BARREL_COLUMNS} FROM barrel WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .map(Barrel::from)
        .ok_or(RepoError::NotFound)
    }

    async fn update_barrel(&self, param: UpdateBarrelParam) -> RepoResult<Barrel> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            "UPDATE barrel
             SET name = COALESCE(?, name), status = COALESCE(?, status), updated_at = ?
             WHERE id = ?",
        )
        .bind(param.name)
        .bind(param.status)
        .bind(to_millis(param.updated_at))
        .bind(param.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        let row = sqlx::query_as::<_, BarrelRow>(&format!(
            "SELECT {BARREL_COLUMNS} FROM barrel WHERE id = ?"
        ))
        .bind(param.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row.into())
    }

    async fn search_barrel(&self, param: SearchBarrelParam) -> RepoResult<SearchBarrelResult> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(1) FROM barrel");
        Self::push_filters(&mut count, &param);
        let total_items: i64 = count.build_query_scalar::<i64>().fetch_one(&*self.db).await?;

        if total_items == 0 {
            return Ok(SearchBarrelResult {
                total_items,
                items: Vec::new(),
            });
        }

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {BARREL_COLUMNS} FROM barrel"));
        Self::push_filters(&mut select, &param);
        select.push(" ORDER BY created_at DESC, code ASC LIMIT ");
        select.push_bind(param.limit);
        select.push(" OFFSET ");
        select.push_bind(param.offset);

        let rows: Vec<BarrelRow> = select.build_query_as().fetch_all(&*self.db).await?;

        Ok(SearchBarrelResult {
            total_items,
            items: rows.into_iter().map(Barrel::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::memory_pool;
    use chrono::{Duration, Utc};

    fn create_param(code: &str, provider: Provider, status: BarrelStatus) -> CreateBarrelParam {
        CreateBarrelParam {
            id: Uuid::new_v4(),
            code: code.into(),
            name: format!("{code} barrel"),
            provider,
            status,
            created_at: crate::models::now_millis(),
        }
    }

    async fn repo() -> SqliteBarrelRepository {
        SqliteBarrelRepository::new(Arc::new(memory_pool().await))
    }

    #[tokio::test]
    async fn create_then_find() {
        let repo = repo().await;
        let created = repo
            .create_barrel(create_param("hippo1", Provider::GoseidonHippo, BarrelStatus::Active))
            .await
            .unwrap();

        let found = repo.find_barrel(created.id).await.unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn duplicate_code_is_exists() {
        let repo = repo().await;
        repo.create_barrel(create_param("hippo1", Provider::GoseidonHippo, BarrelStatus::Active))
            .await
            .unwrap();

        let err = repo
            .create_barrel(create_param("hippo1", Provider::AwsS3, BarrelStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Exists));
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let repo = repo().await;
        let created = repo
            .create_barrel(create_param("hippo1", Provider::GoseidonHippo, BarrelStatus::Active))
            .await
            .unwrap();

        let updated_at = crate::models::now_millis() + Duration::seconds(5);
        let updated = repo
            .update_barrel(UpdateBarrelParam {
                id: created.id,
                name: None,
                status: Some(BarrelStatus::Inactive),
                updated_at,
            })
            .await
            .unwrap();
        assert_eq!(updated.name, created.name);
        assert_eq!(updated.status, BarrelStatus::Inactive);
        assert_eq!(updated.updated_at, Some(updated_at));

        let err = repo
            .update_barrel(UpdateBarrelParam {
                id: Uuid::new_v4(),
                name: Some("x".into()),
                status: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
    }

    #[tokio::test]
    async fn search_filters_and_counts() {
        let repo = repo().await;
        for (code, provider, status) in [
            ("hippo1", Provider::GoseidonHippo, BarrelStatus::Active),
            ("hippo2", Provider::GoseidonHippo, BarrelStatus::Inactive),
            ("s3backup", Provider::AwsS3, BarrelStatus::Active),
        ] {
            repo.create_barrel(create_param(code, provider, status))
                .await
                .unwrap();
        }

        let active = repo
            .search_barrel(SearchBarrelParam {
                codes: vec!["hippo1".into(), "hippo2".into(), "s3backup".into()],
                statuses: vec![BarrelStatus::Active],
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.total_items, 2);
        let mut codes: Vec<_> = active.items.iter().map(|b| b.code.as_str()).collect();
        codes.sort();
        assert_eq!(codes, vec!["hippo1", "s3backup"]);

        let hippo = repo
            .search_barrel(SearchBarrelParam {
                keyword: Some("hippo".into()),
                providers: vec![Provider::GoseidonHippo],
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hippo.total_items, 2);
        assert_eq!(hippo.items.len(), 1);

        let none = repo
            .search_barrel(SearchBarrelParam {
                providers: vec![Provider::AlicloudOss],
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(none.total_items, 0);
        assert!(none.items.is_empty());
    }
}
