use super::{BEGIN_WRITE, is_unique_violation, like_pattern};
use crate::{
    models::{
        barrel::BarrelStatus,
        file::{File, FileStatus, Visibility},
        from_millis,
        location::{FileLocation, LocationStatus},
        to_millis,
    },
    repository::{
        CreateFileParam, FileRepository, FileSort, FindFileParam, RepoError, RepoResult,
        SearchFileParam, SearchFileResult, SearchLocationParam, UpdateFileParam,
        UpdateLocationByIdsParam,
    },
    slug,
};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, slug, name, mimetype, extension, size, visibility, status, meta, \
                            uploaded_at, created_at, updated_at, deleted_at";

const LOCATION_SELECT: &str = "SELECT l.id, l.file_id, l.barrel_id, b.code AS barrel_code, \
                               b.status AS barrel_status, l.external_id, l.priority, l.status, \
                               l.created_at, l.updated_at, l.uploaded_at, l.deleted_at \
                               FROM file_location l JOIN barrel b ON b.id = l.barrel_id";

/// How many random suffixes to try before giving up on a slug.
const MAX_SLUG_ATTEMPTS: usize = 5;

/// Produces the random token appended to colliding slugs.
pub type TokenGenerator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(FromRow)]
struct FileRow {
    id: Uuid,
    slug: String,
    name: String,
    mimetype: String,
    extension: String,
    size: i64,
    visibility: Visibility,
    status: FileStatus,
    meta: String,
    uploaded_at: i64,
    created_at: i64,
    updated_at: Option<i64>,
    deleted_at: Option<i64>,
}

impl FileRow {
    fn into_file(self, locations: Vec<FileLocation>) -> RepoResult<File> {
        Ok(File {
            id: self.id,
            slug: self.slug,
            name: self.name,
            mimetype: self.mimetype,
            extension: self.extension,
            size: self.size,
            visibility: self.visibility,
            status: self.status,
            meta: serde_json::from_str(&self.meta)?,
            uploaded_at: from_millis(self.uploaded_at),
            created_at: from_millis(self.created_at),
            updated_at: self.updated_at.map(from_millis),
            deleted_at: self.deleted_at.map(from_millis),
            locations,
        })
    }
}

#[derive(FromRow)]
struct LocationRow {
    id: Uuid,
    file_id: Uuid,
    barrel_id: Uuid,
    barrel_code: String,
    barrel_status: BarrelStatus,
    external_id: Option<String>,
    priority: i32,
    status: LocationStatus,
    created_at: i64,
    updated_at: i64,
    uploaded_at: Option<i64>,
    deleted_at: Option<i64>,
}

impl From<LocationRow> for FileLocation {
    fn from(row: LocationRow) -> Self {
        FileLocation {
            id: row.id,
            file_id: row.file_id,
            barrel_id: row.barrel_id,
            barrel_code: row.barrel_code,
            barrel_status: row.barrel_status,
            external_id: row.external_id,
            priority: row.priority,
            status: row.status,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
            uploaded_at: row.uploaded_at.map(from_millis),
            deleted_at: row.deleted_at.map(from_millis),
        }
    }
}

#[derive(Clone)]
pub struct SqliteFileRepository {
    db: Arc<SqlitePool>,
    token_generator: TokenGenerator,
}

impl SqliteFileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self::with_token_generator(
            db,
            Arc::new(|| slug::random_token(slug::COLLISION_TOKEN_LEN)),
        )
    }

    pub fn with_token_generator(db: Arc<SqlitePool>, token_generator: TokenGenerator) -> Self {
        Self {
            db,
            token_generator,
        }
    }

    async fn slug_taken(conn: &mut SqliteConnection, slug: &str) -> RepoResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM file WHERE slug = ?")
            .bind(slug)
            .fetch_one(conn)
            .await?;
        Ok(count > 0)
    }

    async fn load_locations(
        conn: &mut SqliteConnection,
        file_id: Uuid,
    ) -> RepoResult<Vec<FileLocation>> {
        let rows = sqlx::query_as::<_, LocationRow>(&format!(
            "{LOCATION_SELECT} WHERE l.file_id = ? ORDER BY l.priority ASC"
        ))
        .bind(file_id)
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(FileLocation::from).collect())
    }

    async fn load_file(conn: &mut SqliteConnection, param: &FindFileParam) -> RepoResult<File> {
        let query = match param {
            FindFileParam::Id(_) => format!("SELECT {FILE_COLUMNS} FROM file WHERE id = ?"),
            FindFileParam::Slug(_) => format!("SELECT {FILE_COLUMNS} FROM file WHERE slug = ?"),
            FindFileParam::LocationId(_) => format!(
                "SELECT {FILE_COLUMNS} FROM file \
                 WHERE id = (SELECT file_id FROM file_location WHERE id = ?)"
            ),
        };
        let find = sqlx::query_as::<_, FileRow>(&query);
        let find = match param {
            FindFileParam::Id(id) | FindFileParam::LocationId(id) => find.bind(*id),
            FindFileParam::Slug(slug) => find.bind(slug.clone()),
        };

        let row = find
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(RepoError::NotFound)?;
        let locations = Self::load_locations(conn, row.id).await?;
        row.into_file(locations)
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, param: &SearchFileParam) {
        builder.push(" WHERE 1 = 1");

        if let Some(keyword) = param.keyword.as_deref().filter(|k| !k.is_empty()) {
            builder.push(" AND name LIKE ");
            builder.push_bind(like_pattern(keyword));
            builder.push(" ESCAPE '\\'");
        }

        if !param.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut statuses = builder.separated(", ");
            for status in &param.statuses {
                statuses.push_bind(*status);
            }
            statuses.push_unseparated(")");
        }

        if !param.visibilities.is_empty() {
            builder.push(" AND visibility IN (");
            let mut visibilities = builder.separated(", ");
            for visibility in &param.visibilities {
                visibilities.push_bind(*visibility);
            }
            visibilities.push_unseparated(")");
        }

        if !param.extensions.is_empty() {
            builder.push(" AND extension IN (");
            let mut extensions = builder.separated(", ");
            for extension in &param.extensions {
                extensions.push_bind(extension.clone());
            }
            extensions.push_unseparated(")");
        }

        if let Some(size) = param.size_gte {
            builder.push(" AND size >= ");
            builder.push_bind(size);
        }
        if let Some(size) = param.size_lte {
            builder.push(" AND size <= ");
            builder.push_bind(size);
        }
        if let Some(at) = param.upload_date_gte {
            builder.push(" AND uploaded_at >= ");
            builder.push_bind(to_millis(at));
        }
        if let Some(at) = param.upload_date_lte {
            builder.push(" AND uploaded_at <= ");
            builder.push_bind(to_millis(at));
        }
    }

    fn order_by(sort: FileSort) -> &'static str {
        match sort {
            FileSort::LatestUpload => " ORDER BY uploaded_at DESC, id ASC",
            FileSort::NewestUpload => " ORDER BY created_at DESC, id ASC",
            FileSort::HighestSize => " ORDER BY size DESC, id ASC",
            FileSort::LowestSize => " ORDER BY size ASC, id ASC",
        }
    }
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn create_file(&self, param: CreateFileParam) -> RepoResult<File> {
        let meta = serde_json::to_string(&param.meta)?;
        let mut tx = self.db.begin_with(BEGIN_WRITE).await?;

        let mut candidate = param.slug.clone();
        let mut attempts = 0;
        while Self::slug_taken(&mut tx, &candidate).await? {
            if attempts == MAX_SLUG_ATTEMPTS {
                return Err(RepoError::Exists);
            }
            attempts += 1;
            candidate = slug::with_token(&param.slug, &(self.token_generator)());
            debug!("slug {} is taken, trying {}", param.slug, candidate);
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO file ({FILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)"
        ))
        .bind(param.id)
        .bind(&candidate)
        .bind(&param.name)
        .bind(&param.mimetype)
        .bind(&param.extension)
        .bind(param.size)
        .bind(param.visibility)
        .bind(param.status)
        .bind(&meta)
        .bind(to_millis(param.uploaded_at))
        .bind(to_millis(param.created_at))
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(RepoError::Exists),
            Err(err) => return Err(RepoError::Sqlx(err)),
        }

        for location in &param.locations {
            let inserted = sqlx::query(
                "INSERT INTO file_location (
                    id, file_id, barrel_id, external_id, priority, status,
                    created_at, updated_at, uploaded_at, deleted_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
            )
            .bind(location.id)
            .bind(param.id)
            .bind(location.barrel_id)
            .bind(&location.external_id)
            .bind(location.priority)
            .bind(location.status)
            .bind(to_millis(location.created_at))
            .bind(to_millis(location.created_at))
            .bind(location.uploaded_at.map(to_millis))
            .execute(&mut *tx)
            .await;
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => return Err(RepoError::Exists),
                Err(err) => return Err(RepoError::Sqlx(err)),
            }
        }

        let file = Self::load_file(&mut tx, &FindFileParam::Id(param.id)).await?;
        tx.commit().await?;
        Ok(file)
    }

    async fn find_file(&self, param: FindFileParam) -> RepoResult<File> {
        let mut conn = self.db.acquire().await?;
        Self::load_file(&mut conn, &param).await
    }

    async fn search_file(&self, param: SearchFileParam) -> RepoResult<SearchFileResult> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(1) FROM file");
        Self::push_filters(&mut count, &param);
        let total_items: i64 = count.build_query_scalar::<i64>().fetch_one(&*self.db).await?;

        if total_items == 0 {
            return Ok(SearchFileResult {
                total_items,
                items: Vec::new(),
            });
        }

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {FILE_COLUMNS} FROM file"));
        Self::push_filters(&mut select, &param);
        select.push(Self::order_by(param.sort));
        select.push(" LIMIT ");
        select.push_bind(param.limit);
        select.push(" OFFSET ");
        select.push_bind(param.offset);

        let rows: Vec<FileRow> = select.build_query_as().fetch_all(&*self.db).await?;
        let items = rows
            .into_iter()
            .map(|row| row.into_file(Vec::new()))
            .collect::<RepoResult<Vec<_>>>()?;

        Ok(SearchFileResult { total_items, items })
    }

    async fn update_file(&self, param: UpdateFileParam) -> RepoResult<File> {
        let mut tx = self.db.begin_with(BEGIN_WRITE).await?;

        let current: Option<FileStatus> =
            sqlx::query_scalar("SELECT status FROM file WHERE id = ?")
                .bind(param.id)
                .fetch_optional(&mut *tx)
                .await?;
        match current {
            None => return Err(RepoError::NotFound),
            Some(FileStatus::Deleted) => return Err(RepoError::Deleted),
            Some(status) if param.expected_status.is_some_and(|expected| expected != status) => {
                return Err(RepoError::NotFound);
            }
            Some(_) => {}
        }

        sqlx::query(
            "UPDATE file
             SET status = COALESCE(?, status), updated_at = ?, deleted_at = COALESCE(?, deleted_at)
             WHERE id = ?",
        )
        .bind(param.status)
        .bind(to_millis(param.updated_at))
        .bind(param.deleted_at.map(to_millis))
        .bind(param.id)
        .execute(&mut *tx)
        .await?;

        let file = Self::load_file(&mut tx, &FindFileParam::Id(param.id)).await?;
        tx.commit().await?;
        Ok(file)
    }

    async fn search_location(&self, param: SearchLocationParam) -> RepoResult<Vec<FileLocation>> {
        let mut select = QueryBuilder::<Sqlite>::new(LOCATION_SELECT);
        select.push(" WHERE 1 = 1");
        if !param.statuses.is_empty() {
            select.push(" AND l.status IN (");
            let mut statuses = select.separated(", ");
            for status in &param.statuses {
                statuses.push_bind(*status);
            }
            statuses.push_unseparated(")");
        }
        select.push(" ORDER BY l.created_at ASC, l.priority ASC LIMIT ");
        select.push_bind(param.limit);

        let rows: Vec<LocationRow> = select.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows.into_iter().map(FileLocation::from).collect())
    }

    async fn update_location_by_ids(&self, param: UpdateLocationByIdsParam) -> RepoResult<u64> {
        if param.ids.is_empty() {
            return Err(RepoError::InvalidParam("ids must not be empty".into()));
        }

        let mut update = QueryBuilder::<Sqlite>::new("UPDATE file_location SET status = ");
        update.push_bind(param.status);
        update.push(", updated_at = ");
        update.push_bind(to_millis(param.updated_at));
        update.push(", external_id = COALESCE(");
        update.push_bind(param.external_id);
        update.push(", external_id), uploaded_at = COALESCE(");
        update.push_bind(param.uploaded_at.map(to_millis));
        update.push(", uploaded_at), deleted_at = COALESCE(");
        update.push_bind(param.deleted_at.map(to_millis));
        update.push(", deleted_at) WHERE id IN (");
        let mut ids = update.separated(", ");
        for id in &param.ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
        if let Some(expected) = param.expected_status {
            update.push(" AND status = ");
            update.push_bind(expected);
        }

        let mut tx = self.db.begin().await?;
        let result = update.build().execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            barrel::{Barrel, Provider},
            now_millis,
        },
        repository::{
            BarrelRepository, CreateBarrelParam, CreateLocationParam,
            sqlite::{SqliteBarrelRepository, connect, memory_pool, run_migrations},
        },
    };
    use chrono::Duration;
    use std::collections::{BTreeMap, HashSet};

    struct Fixture {
        files: SqliteFileRepository,
        primary: Barrel,
        replica: Barrel,
    }

    async fn fixture() -> Fixture {
        fixture_on(
            Arc::new(memory_pool().await),
            Arc::new(|| "abcdefg".to_string()),
        )
        .await
    }

    async fn fixture_on(pool: Arc<SqlitePool>, token_generator: TokenGenerator) -> Fixture {
        let barrels = SqliteBarrelRepository::new(pool.clone());
        let mut created = Vec::new();
        for code in ["hippo1", "s3backup"] {
            created.push(
                barrels
                    .create_barrel(CreateBarrelParam {
                        id: Uuid::new_v4(),
                        code: code.into(),
                        name: code.into(),
                        provider: Provider::GoseidonHippo,
                        status: BarrelStatus::Active,
                        created_at: now_millis(),
                    })
                    .await
                    .unwrap(),
            );
        }
        let replica = created.pop().unwrap();
        let primary = created.pop().unwrap();
        Fixture {
            files: SqliteFileRepository::with_token_generator(pool, token_generator),
            primary,
            replica,
        }
    }

    fn create_param(fx: &Fixture, name_slug: &str, size: i64) -> CreateFileParam {
        let created_at = now_millis();
        CreateFileParam {
            id: Uuid::new_v4(),
            slug: name_slug.into(),
            name: "Dolphin 22".into(),
            mimetype: "image/jpeg".into(),
            extension: "jpg".into(),
            size,
            visibility: Visibility::Public,
            status: FileStatus::Available,
            meta: BTreeMap::from([("owner".to_string(), "ops".to_string())]),
            uploaded_at: created_at,
            created_at,
            locations: vec![
                CreateLocationParam {
                    id: Uuid::new_v4(),
                    barrel_id: fx.primary.id,
                    external_id: Some("obj-primary".into()),
                    priority: 1,
                    status: LocationStatus::Available,
                    created_at,
                    uploaded_at: Some(created_at),
                },
                CreateLocationParam {
                    id: Uuid::new_v4(),
                    barrel_id: fx.replica.id,
                    external_id: None,
                    priority: 2,
                    status: LocationStatus::Pending,
                    created_at,
                    uploaded_at: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn create_persists_file_with_ordered_locations() {
        let fx = fixture().await;
        let file = fx
            .files
            .create_file(create_param(&fx, "dolphin-22.jpg", 23343))
            .await
            .unwrap();

        assert_eq!(file.slug, "dolphin-22.jpg");
        assert_eq!(file.meta.get("owner").map(String::as_str), Some("ops"));
        assert_eq!(file.locations.len(), 2);
        assert_eq!(file.locations[0].priority, 1);
        assert_eq!(file.locations[0].barrel_code, "hippo1");
        assert_eq!(file.locations[1].barrel_code, "s3backup");
        assert_eq!(file.locations[1].external_id, None);

        let by_slug = fx
            .files
            .find_file(FindFileParam::Slug("dolphin-22.jpg".into()))
            .await
            .unwrap();
        assert_eq!(by_slug, file);

        let by_location = fx
            .files
            .find_file(FindFileParam::LocationId(file.locations[1].id))
            .await
            .unwrap();
        assert_eq!(by_location.id, file.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_on_file_database_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("gateway.db").display());
        let pool = connect(&url, 5).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let fx = Arc::new(
            fixture_on(
                Arc::new(pool),
                Arc::new(|| slug::random_token(slug::COLLISION_TOKEN_LEN)),
            )
            .await,
        );

        for round in 0..5 {
            let tasks: Vec<_> = (0..4)
                .map(|i| {
                    let fx = fx.clone();
                    let slug = if i % 2 == 0 {
                        "dolphin-22.jpg".to_string()
                    } else {
                        format!("whale-{round}-{i}.jpg")
                    };
                    tokio::spawn(async move { fx.files.create_file(create_param(&fx, &slug, 1)).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }
        }

        let found = fx
            .files
            .search_file(SearchFileParam {
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.total_items, 20);
        let slugs: HashSet<String> = found.items.into_iter().map(|file| file.slug).collect();
        assert_eq!(slugs.len(), 20);
        assert!(slugs.contains("dolphin-22.jpg"));
    }

    #[tokio::test]
    async fn colliding_slug_gets_token_before_extension() {
        let fx = fixture().await;
        fx.files
            .create_file(create_param(&fx, "dolphin-22.jpg", 1))
            .await
            .unwrap();
        let second = fx
            .files
            .create_file(create_param(&fx, "dolphin-22.jpg", 1))
            .await
            .unwrap();

        assert_eq!(second.slug, "dolphin-22-abcdefg.jpg");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let fx = fixture().await;
        let err = fx
            .files
            .find_file(FindFileParam::Id(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
    }

    #[tokio::test]
    async fn update_file_refuses_deleted_files() {
        let fx = fixture().await;
        let file = fx
            .files
            .create_file(create_param(&fx, "dolphin-22.jpg", 1))
            .await
            .unwrap();

        let now = now_millis();
        let deleted = fx
            .files
            .update_file(UpdateFileParam {
                id: file.id,
                expected_status: Some(FileStatus::Available),
                status: Some(FileStatus::Deleted),
                updated_at: now,
                deleted_at: Some(now),
            })
            .await
            .unwrap();
        assert_eq!(deleted.status, FileStatus::Deleted);
        assert_eq!(deleted.deleted_at, Some(now));

        let err = fx
            .files
            .update_file(UpdateFileParam {
                id: file.id,
                expected_status: None,
                status: Some(FileStatus::Deleted),
                updated_at: now,
                deleted_at: Some(now),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Deleted));
    }

    #[tokio::test]
    async fn location_updates_compare_and_set() {
        let fx = fixture().await;
        let file = fx
            .files
            .create_file(create_param(&fx, "dolphin-22.jpg", 1))
            .await
            .unwrap();
        let replica_id = file.locations[1].id;

        let pending = fx
            .files
            .search_location(SearchLocationParam {
                statuses: vec![LocationStatus::Pending],
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, replica_id);

        let scheduled = UpdateLocationByIdsParam {
            ids: vec![replica_id],
            expected_status: Some(LocationStatus::Pending),
            status: LocationStatus::Replicating,
            updated_at: now_millis(),
            external_id: None,
            uploaded_at: None,
            deleted_at: None,
        };
        assert_eq!(
            fx.files.update_location_by_ids(scheduled.clone()).await.unwrap(),
            1
        );
        assert_eq!(fx.files.update_location_by_ids(scheduled).await.unwrap(), 0);

        let uploaded_at = now_millis() + Duration::seconds(1);
        fx.files
            .update_location_by_ids(UpdateLocationByIdsParam {
                ids: vec![replica_id],
                expected_status: None,
                status: LocationStatus::Available,
                updated_at: uploaded_at,
                external_id: Some("obj-replica".into()),
                uploaded_at: Some(uploaded_at),
                deleted_at: None,
            })
            .await
            .unwrap();

        let file = fx.files.find_file(FindFileParam::Id(file.id)).await.unwrap();
        assert_eq!(file.locations[1].status, LocationStatus::Available);
        assert_eq!(file.locations[1].external_id.as_deref(), Some("obj-replica"));
        assert_eq!(file.locations[1].uploaded_at, Some(uploaded_at));
    }

    #[tokio::test]
    async fn search_filters_sorts_and_counts() {
        let fx = fixture().await;
        for (slug, size) in [("a.jpg", 10), ("b.jpg", 30), ("c.jpg", 20)] {
            fx.files
                .create_file(create_param(&fx, slug, size))
                .await
                .unwrap();
        }

        let largest = fx
            .files
            .search_file(SearchFileParam {
                keyword: Some("dolphin".into()),
                size_gte: Some(15),
                sort: FileSort::HighestSize,
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(largest.total_items, 2);
        let sizes: Vec<_> = largest.items.iter().map(|f| f.size).collect();
        assert_eq!(sizes, vec![30, 20]);

        let page = fx
            .files
            .search_file(SearchFileParam {
                sort: FileSort::LowestSize,
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_items, 3);
        assert_eq!(page.items[0].size, 20);

        let none = fx
            .files
            .search_file(SearchFileParam {
                visibilities: vec![Visibility::Protected],
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(none.total_items, 0);
    }
}
