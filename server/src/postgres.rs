use {
    crate::metadata::{AreaStore, MetadataError, MetadataStore},
    async_trait::async_trait,
    sharebucket_protocol::{
        AreaId, AreaKey, AreaSummary, DateTimeUtc, FileId, FileMetadata, FileName, LogicalPath,
        NewFileMetadata, NewStorageArea, PrincipalId, StorageArea,
    },
    sqlx::{FromRow, PgPool, query, query_as, query_scalar},
    tracing::instrument,
    zeroize::Zeroize,
};

const FILE_COLUMNS: &str = "id, area_id, path, filename, extension, created_at";

/// Areas and file records in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct FileRow {
    id: i64,
    area_id: i32,
    path: String,
    filename: String,
    extension: String,
    created_at: DateTimeUtc,
}

impl FileRow {
    fn into_record(self) -> Result<FileMetadata, MetadataError> {
        Ok(FileMetadata {
            id: FileId(self.id),
            area_id: AreaId(self.area_id),
            path: self
                .path
                .parse()
                .map_err(|err| MetadataError::Corrupt(format!("path {:?}: {err}", self.path)))?,
            filename: self.filename.parse().map_err(|err| {
                MetadataError::Corrupt(format!("file name {:?}: {err}", self.filename))
            })?,
            extension: self.extension,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct AreaRow {
    id: i32,
    name: String,
    area_key: Vec<u8>,
    owner_id: i32,
    max_size: i64,
    created_at: DateTimeUtc,
}

impl AreaRow {
    fn into_area(mut self, members: Vec<PrincipalId>) -> Result<StorageArea, MetadataError> {
        let key = AreaKey::try_from(self.area_key.as_slice());
        self.area_key.zeroize();
        Ok(StorageArea {
            id: AreaId(self.id),
            name: self.name,
            key: key.map_err(|err| MetadataError::Corrupt(format!("key of area {}: {err}", self.id)))?,
            owner: PrincipalId(self.owner_id),
            members,
            max_size: quota_from_db(self.max_size)?,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct SummaryRow {
    id: i32,
    name: String,
    owner_id: i32,
    max_size: i64,
    created_at: DateTimeUtc,
}

fn quota_from_db(value: i64) -> Result<u64, MetadataError> {
    u64::try_from(value).map_err(|_| MetadataError::Corrupt(format!("negative quota {value}")))
}

fn collect_records(rows: Vec<FileRow>) -> Result<Vec<FileMetadata>, MetadataError> {
    rows.into_iter().map(FileRow::into_record).collect()
}

fn conflict_or_database(err: sqlx::Error) -> MetadataError {
    let unique_violation = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation());
    if unique_violation {
        MetadataError::Conflict
    } else {
        MetadataError::Database(err)
    }
}

impl PgStore {
    #[must_use]
    #[inline]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[inline]
    pub async fn connect(database_url: &str) -> Result<Self, MetadataError> {
        Ok(Self::new(PgPool::connect(database_url).await?))
    }

    #[must_use]
    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[inline]
    pub async fn migrate(&self) -> Result<(), MetadataError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    async fn members(&self, area: AreaId) -> Result<Vec<PrincipalId>, MetadataError> {
        let members: Vec<i32> = query_scalar(
            "SELECT principal_id FROM area_members WHERE area_id = $1 ORDER BY principal_id",
        )
        .bind(area.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(members.into_iter().map(PrincipalId).collect())
    }
}

#[async_trait]
impl MetadataStore for PgStore {
    #[instrument(skip_all, fields(area = %record.area_id, path = %record.path, filename = %record.filename))]
    #[inline]
    async fn create(&self, record: NewFileMetadata) -> Result<FileMetadata, MetadataError> {
        let row: FileRow = query_as(&format!(
            "INSERT INTO file_metadata (area_id, path, filename, extension, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {FILE_COLUMNS}"
        ))
        .bind(record.area_id.0)
        .bind(record.path.as_str())
        .bind(record.filename.as_str())
        .bind(&record.extension)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_or_database)?;
        row.into_record()
    }

    #[inline]
    async fn find_by_identity(
        &self,
        area: AreaId,
        path: &LogicalPath,
        filename: &FileName,
    ) -> Result<Option<FileMetadata>, MetadataError> {
        let row: Option<FileRow> = query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM file_metadata
            WHERE area_id = $1 AND path = $2 AND filename = $3"
        ))
        .bind(area.0)
        .bind(path.as_str())
        .bind(filename.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(FileRow::into_record).transpose()
    }

    #[inline]
    async fn find_in_directory(
        &self,
        area: AreaId,
        path: &LogicalPath,
    ) -> Result<Vec<FileMetadata>, MetadataError> {
        let rows: Vec<FileRow> = query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM file_metadata
            WHERE area_id = $1 AND path = $2
            ORDER BY filename"
        ))
        .bind(area.0)
        .bind(path.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect_records(rows)
    }

    #[inline]
    async fn find_all_under_prefix(
        &self,
        area: AreaId,
        prefix: &LogicalPath,
    ) -> Result<Vec<FileMetadata>, MetadataError> {
        // Stored paths end with '/', so a plain prefix match respects segment boundaries.
        let rows: Vec<FileRow> = query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM file_metadata
            WHERE area_id = $1 AND starts_with(path, $2)
            ORDER BY id"
        ))
        .bind(area.0)
        .bind(prefix.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect_records(rows)
    }

    #[inline]
    async fn find_all_in_area(&self, area: AreaId) -> Result<Vec<FileMetadata>, MetadataError> {
        let rows: Vec<FileRow> = query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM file_metadata WHERE area_id = $1 ORDER BY id"
        ))
        .bind(area.0)
        .fetch_all(&self.pool)
        .await?;
        collect_records(rows)
    }

    #[inline]
    async fn delete_all(&self, ids: &[FileId]) -> Result<u64, MetadataError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        Ok(query("DELETE FROM file_metadata WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    #[inline]
    async fn delete_area(&self, area: AreaId) -> Result<bool, MetadataError> {
        let deleted = query("DELETE FROM storage_areas WHERE id = $1")
            .bind(area.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[async_trait]
impl AreaStore for PgStore {
    #[instrument(skip_all, fields(name = %area.name, owner = %area.owner))]
    #[inline]
    async fn create_area(&self, area: NewStorageArea) -> Result<StorageArea, MetadataError> {
        let max_size = i64::try_from(area.max_size)
            .map_err(|_| MetadataError::Corrupt(format!("quota {} is too large", area.max_size)))?;
        let mut tx = self.pool.begin().await?;
        let row: AreaRow = query_as(
            "INSERT INTO storage_areas (name, area_key, owner_id, max_size, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, area_key, owner_id, max_size, created_at",
        )
        .bind(&area.name)
        .bind(area.key.get().as_slice())
        .bind(area.owner.0)
        .bind(max_size)
        .bind(area.created_at)
        .fetch_one(&mut *tx)
        .await?;
        query("INSERT INTO area_members (area_id, principal_id) VALUES ($1, $2)")
            .bind(row.id)
            .bind(area.owner.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        row.into_area(vec![area.owner])
    }

    #[inline]
    async fn area(&self, area: AreaId) -> Result<Option<StorageArea>, MetadataError> {
        let row: Option<AreaRow> = query_as(
            "SELECT id, name, area_key, owner_id, max_size, created_at
            FROM storage_areas WHERE id = $1",
        )
        .bind(area.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let members = self.members(area).await?;
        row.into_area(members).map(Some)
    }

    #[inline]
    async fn areas_for_member(
        &self,
        principal: PrincipalId,
    ) -> Result<Vec<AreaSummary>, MetadataError> {
        let rows: Vec<SummaryRow> = query_as(
            "SELECT a.id, a.name, a.owner_id, a.max_size, a.created_at
            FROM storage_areas a
            JOIN area_members m ON m.area_id = a.id
            WHERE m.principal_id = $1
            ORDER BY a.id",
        )
        .bind(principal.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(AreaSummary {
                    id: AreaId(row.id),
                    name: row.name,
                    owner: PrincipalId(row.owner_id),
                    max_size: quota_from_db(row.max_size)?,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    #[inline]
    async fn add_member(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, MetadataError> {
        let added = query(
            "INSERT INTO area_members (area_id, principal_id)
            SELECT $1, $2 WHERE EXISTS (SELECT 1 FROM storage_areas WHERE id = $1)
            ON CONFLICT DO NOTHING",
        )
        .bind(area.0)
        .bind(principal.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(added > 0)
    }

    #[inline]
    async fn remove_member(
        &self,
        area: AreaId,
        principal: PrincipalId,
    ) -> Result<bool, MetadataError> {
        let removed = query("DELETE FROM area_members WHERE area_id = $1 AND principal_id = $2")
            .bind(area.0)
            .bind(principal.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    #[inline]
    async fn is_member(&self, area: AreaId, principal: PrincipalId) -> Result<bool, MetadataError> {
        Ok(query_scalar(
            "SELECT EXISTS (SELECT 1 FROM area_members WHERE area_id = $1 AND principal_id = $2)",
        )
        .bind(area.0)
        .bind(principal.0)
        .fetch_one(&self.pool)
        .await?)
    }

    #[inline]
    async fn is_owner(&self, area: AreaId, principal: PrincipalId) -> Result<bool, MetadataError> {
        Ok(query_scalar(
            "SELECT EXISTS (SELECT 1 FROM storage_areas WHERE id = $1 AND owner_id = $2)",
        )
        .bind(area.0)
        .bind(principal.0)
        .fetch_one(&self.pool)
        .await?)
    }
}
