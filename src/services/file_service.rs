//! File orchestration engine.
//!
//! Uploads go synchronously to the primary barrel only; replicas are created
//! `pending` and converge through the replication queue. Deletion commits the
//! file first and then fans one message per location out to the deletion
//! queue. Every location transition is a compare-and-set in the repository
//! driven by [`LocationStatus::next`].

use super::{MAX_PAGE_SIZE, SearchSummary, offset, repo_failure};
use crate::{
    errors::{AppError, AppResult},
    models::{
        barrel::{Barrel, BarrelStatus},
        file::{File, FileMeta, FileStatus, Visibility},
        location::{FileLocation, LocationEvent, LocationStatus, PRIMARY_PRIORITY},
        message::{DeleteFileMessage, ScheduleReplicationMessage},
        now_millis, to_millis,
    },
    queue::{EXCHANGE_FILE_DELETION, EXCHANGE_FILE_REPLICATION, PublishParam, Queuer},
    repository::{
        self as repo, BarrelRepository, CreateLocationParam, FileRepository, FileSort,
        FindFileParam, RepoError, SearchLocationParam, UpdateFileParam, UpdateLocationByIdsParam,
    },
    services::barrel_service::validate_code,
    session::{
        CreateSessionParam, FEATURE_RETRIEVE_FILE, SessionService, VerifySessionParam,
    },
    slug,
    storage::{
        DeleteObjectParam, ObjectStream, RetrieveObjectParam, StorageDriver, UploadObjectParam,
        router::StorageRouter,
    },
    validation,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifetime of the session minted for protected uploads, in seconds.
pub const PROTECTED_SESSION_DURATION: i64 = 1800;
pub const MAX_UPLOAD_BARRELS: usize = 3;
pub const MAX_REPLICATION_BATCH: i64 = 50;

const MSG_FILE_NOT_AVAILABLE: &str = "file is not available";
const MSG_FILE_NOT_FOUND: &str = "file is not found";
const MSG_INVALID_BARREL: &str = "there is invalid barrel";
const MSG_INVALID_FILE_DATA: &str = "file data is invalid";

#[derive(Debug, Clone)]
pub struct UploadFileInfo {
    pub name: String,
    pub mimetype: String,
    /// May be empty.
    pub extension: String,
    pub size: i64,
    pub meta: FileMeta,
}

#[derive(Debug, Clone)]
pub struct UploadFileSetting {
    pub visibility: Visibility,
    /// Barrel codes; the first one is the primary.
    pub barrels: Vec<String>,
}

pub struct UploadFileParam {
    pub data: Option<ObjectStream>,
    pub info: UploadFileInfo,
    pub setting: UploadFileSetting,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadFileResult {
    #[serde(flatten)]
    pub file: File,
    pub file_url: String,
    /// `file_url`, plus a session token for protected files.
    pub access_url: String,
}

#[derive(Debug, Clone)]
pub struct RetrieveFileBySlugParam {
    pub slug: String,
    pub token: Option<String>,
}

pub struct RetrieveFileResult {
    pub file: File,
    pub data: ObjectStream,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteFileResult {
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProceedDeletionResult {
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleReplicationResult {
    pub total_items: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProceedReplicationResult {
    pub location_id: Uuid,
    pub barrel_id: Uuid,
    pub external_id: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFileParam {
    pub keyword: Option<String>,
    pub statuses: Vec<FileStatus>,
    pub visibilities: Vec<Visibility>,
    pub extensions: Vec<String>,
    pub size_gte: Option<i64>,
    pub size_lte: Option<i64>,
    pub upload_date_gte: Option<DateTime<Utc>>,
    pub upload_date_lte: Option<DateTime<Utc>>,
    pub page: i64,
    pub total_items: i64,
    pub sort: FileSort,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchFileResult {
    pub summary: SearchSummary,
    pub items: Vec<File>,
}

fn validate_id(field: &str, id: Uuid) -> AppResult<()> {
    if id.is_nil() {
        return Err(AppError::invalid_param(format!("{field} is invalid")));
    }
    Ok(())
}

fn validate_upload(info: &UploadFileInfo, setting: &UploadFileSetting) -> AppResult<()> {
    validation::length("name", &info.name, 1, 256)?;
    validation::printable_ascii("name", &info.name)?;
    validation::length("mimetype", &info.mimetype, 1, 128)?;
    validation::printable_ascii("mimetype", &info.mimetype)?;
    validation::length("extension", &info.extension, 0, 32)?;
    validation::printable_ascii("extension", &info.extension)?;
    validation::at_least("size", info.size, 1)?;
    validation::meta(&info.meta)?;

    validation::item_count("barrels", &setting.barrels, 1, MAX_UPLOAD_BARRELS)?;
    validation::unique("barrels", &setting.barrels)?;
    for code in &setting.barrels {
        validate_code(code)?;
    }
    Ok(())
}

/// Location with the given id inside `file`, or `NOT_FOUND`.
fn find_location(file: &File, location_id: Uuid) -> AppResult<&FileLocation> {
    file.location(location_id)
        .ok_or_else(|| AppError::not_found("file location is not found"))
}

#[derive(Clone)]
pub struct FileService {
    files: Arc<dyn FileRepository>,
    barrels: Arc<dyn BarrelRepository>,
    sessions: SessionService,
    router: StorageRouter,
    queuer: Arc<dyn Queuer>,
    app_host: String,
}

impl FileService {
    pub fn new(
        files: Arc<dyn FileRepository>,
        barrels: Arc<dyn BarrelRepository>,
        sessions: SessionService,
        router: StorageRouter,
        queuer: Arc<dyn Queuer>,
        app_host: impl Into<String>,
    ) -> Self {
        Self {
            files,
            barrels,
            sessions,
            router,
            queuer,
            app_host: app_host.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn file_url(&self, slug: &str) -> String {
        format!("{}/file/{}", self.app_host, slug)
    }

    fn storage(&self, barrel_code: &str) -> AppResult<Arc<dyn StorageDriver>> {
        self.router
            .create_storage(barrel_code)
            .map_err(|err| AppError::action_failed(err.to_string()))
    }

    /// Active barrels for `codes`, in request order.
    async fn active_barrels(&self, codes: &[String]) -> AppResult<Vec<Barrel>> {
        let found = self
            .barrels
            .search_barrel(repo::SearchBarrelParam {
                codes: codes.to_vec(),
                statuses: vec![BarrelStatus::Active],
                limit: codes.len() as i64,
                ..Default::default()
            })
            .await
            .map_err(repo_failure)?;
        if found.items.len() != codes.len() {
            return Err(AppError::invalid_param(MSG_INVALID_BARREL));
        }

        let mut by_code: HashMap<String, Barrel> = found
            .items
            .into_iter()
            .map(|barrel| (barrel.code.clone(), barrel))
            .collect();
        codes
            .iter()
            .map(|code| {
                by_code
                    .remove(code)
                    .ok_or_else(|| AppError::invalid_param(MSG_INVALID_BARREL))
            })
            .collect()
    }

    async fn find_file(&self, param: FindFileParam, missing: &str) -> AppResult<File> {
        self.files.find_file(param).await.map_err(|err| match err {
            RepoError::NotFound => AppError::not_found(missing),
            err => repo_failure(err),
        })
    }

    async fn publish<T: Serialize>(&self, exchange: &str, messages: &[T]) -> AppResult<()> {
        for message in messages {
            let body = serde_json::to_vec(message)
                .map_err(|err| AppError::action_failed(err.to_string()))?;
            self.queuer
                .publish(PublishParam {
                    exchange: exchange.to_string(),
                    body,
                })
                .await
                .map_err(|err| {
                    warn!(exchange, "failed to publish: {}", err);
                    AppError::action_failed(err.to_string())
                })?;
        }
        Ok(())
    }

    /// Compare-and-set on a single location. Returns whether it moved.
    async fn transition(
        &self,
        location: &FileLocation,
        from: LocationStatus,
        event: LocationEvent,
        update: impl FnOnce(&mut UpdateLocationByIdsParam),
    ) -> AppResult<bool> {
        let to = from
            .next(event)
            .map_err(|err| AppError::forbidden(err.to_string()))?;
        let mut param = UpdateLocationByIdsParam {
            ids: vec![location.id],
            expected_status: Some(from),
            status: to,
            updated_at: now_millis(),
            external_id: None,
            uploaded_at: None,
            deleted_at: None,
        };
        update(&mut param);

        let updated = self
            .files
            .update_location_by_ids(param)
            .await
            .map_err(repo_failure)?;
        Ok(updated == 1)
    }

    pub async fn upload_file(&self, param: UploadFileParam) -> AppResult<UploadFileResult> {
        let data = param
            .data
            .ok_or_else(|| AppError::invalid_param("file is not specified"))?;
        let UploadFileParam { info, setting, .. } = param;
        validate_upload(&info, &setting)?;

        let session = match setting.visibility {
            Visibility::Protected => Some(
                self.sessions
                    .create_session(CreateSessionParam {
                        duration: PROTECTED_SESSION_DURATION,
                        features: vec![FEATURE_RETRIEVE_FILE.to_string()],
                    })
                    .await
                    .map_err(|err| AppError::action_failed(err.message))?,
            ),
            Visibility::Public => None,
        };

        let barrels = self.active_barrels(&setting.barrels).await?;
        let slots: Vec<(Barrel, Uuid)> = barrels
            .into_iter()
            .map(|barrel| (barrel, Uuid::new_v4()))
            .collect();
        let (primary, primary_location_id) = slots
            .first()
            .ok_or_else(|| AppError::invalid_param(MSG_INVALID_BARREL))?;

        let storage = self.storage(&primary.code)?;
        let uploaded = storage
            .upload_object(UploadObjectParam {
                data,
                id: Some(primary_location_id.to_string()),
                name: Some(info.name.clone()),
                mimetype: Some(info.mimetype.clone()),
                extension: Some(info.extension.clone()).filter(|ext| !ext.is_empty()),
            })
            .await
            .map_err(|err| {
                warn!(barrel = %primary.code, "primary upload failed: {}", err);
                AppError::action_failed(err.to_string())
            })?;
        debug!(
            barrel = %primary.code,
            "stored primary object {}", uploaded.object_id
        );

        let created_at = now_millis();
        let locations = slots
            .iter()
            .enumerate()
            .map(|(index, (barrel, location_id))| {
                let primary = index == 0;
                CreateLocationParam {
                    id: *location_id,
                    barrel_id: barrel.id,
                    external_id: primary.then(|| uploaded.object_id.clone()),
                    priority: PRIMARY_PRIORITY + index as i32,
                    status: if primary {
                        LocationStatus::Available
                    } else {
                        LocationStatus::Pending
                    },
                    created_at,
                    uploaded_at: primary.then_some(uploaded.uploaded_at),
                }
            })
            .collect();

        let file = self
            .files
            .create_file(repo::CreateFileParam {
                id: Uuid::new_v4(),
                slug: slug::file_slug(&info.name, &info.extension),
                name: info.name,
                mimetype: info.mimetype,
                extension: info.extension,
                size: info.size,
                visibility: setting.visibility,
                status: FileStatus::Available,
                meta: info.meta,
                uploaded_at: uploaded.uploaded_at,
                created_at,
                locations,
            })
            .await
            .map_err(repo_failure)?;

        let file_url = self.file_url(&file.slug);
        let access_url = match &session {
            Some(session) => format!("{file_url}?token={}", session.token),
            None => file_url.clone(),
        };
        info!(
            "uploaded file {} as {} to {} barrel(s)",
            file.id,
            file.slug,
            file.locations.len()
        );

        Ok(UploadFileResult {
            file,
            file_url,
            access_url,
        })
    }

    /// Streams the file from the first healthy location, in priority order.
    pub async fn retrieve_file_by_slug(
        &self,
        param: RetrieveFileBySlugParam,
    ) -> AppResult<RetrieveFileResult> {
        validation::length("slug", &param.slug, 1, slug::MAX_SLUG_LEN)?;

        let file = self
            .find_file(FindFileParam::Slug(param.slug), MSG_FILE_NOT_AVAILABLE)
            .await?;
        if !file.is_available() {
            return Err(AppError::not_found(MSG_FILE_NOT_AVAILABLE));
        }

        if file.visibility == Visibility::Protected {
            let token = param
                .token
                .filter(|token| !token.is_empty())
                .ok_or_else(|| AppError::forbidden("session is not specified"))?;
            self.sessions
                .verify_session(VerifySessionParam {
                    token,
                    feature: FEATURE_RETRIEVE_FILE.to_string(),
                })
                .await
                .map_err(|err| AppError::forbidden(err.message))?;
        }

        if file.locations.is_empty() {
            return Err(AppError::action_failed(MSG_INVALID_FILE_DATA));
        }

        let last = file.locations.len() - 1;
        let mut failure = AppError::action_failed(MSG_INVALID_FILE_DATA);
        let mut retrieved = None;
        for (index, location) in file.locations.iter().enumerate() {
            if location.barrel_status != BarrelStatus::Active {
                failure = AppError::action_failed("barrels are not active");
                continue;
            }
            let object_id = match (&location.external_id, location.status) {
                (Some(object_id), LocationStatus::Available) => object_id.clone(),
                _ => {
                    failure = AppError::action_failed("file replicas are not available");
                    continue;
                }
            };

            let storage = match self.storage(&location.barrel_code) {
                Ok(storage) => storage,
                Err(err) => {
                    failure = err;
                    break;
                }
            };

            match storage
                .retrieve_object(RetrieveObjectParam { object_id })
                .await
            {
                Ok(object) => {
                    retrieved = Some(object);
                    break;
                }
                Err(err) => {
                    warn!(
                        barrel = %location.barrel_code,
                        "failed to retrieve file {}: {}", file.id, err
                    );
                    if index == last {
                        failure = AppError::action_failed("failed retrieve file from barrel");
                    }
                }
            }
        }

        let object = retrieved.ok_or(failure)?;
        Ok(RetrieveFileResult {
            file,
            data: object.data,
            retrieved_at: object.retrieved_at,
        })
    }

    pub async fn get_file_by_id(&self, id: Uuid) -> AppResult<File> {
        validate_id("id", id)?;
        self.find_file(FindFileParam::Id(id), MSG_FILE_NOT_FOUND)
            .await
    }

    pub async fn search_file(&self, param: SearchFileParam) -> AppResult<SearchFileResult> {
        validation::at_least("page", param.page, 1)?;
        validation::range("total_items", param.total_items, 1, MAX_PAGE_SIZE)?;
        if let Some(keyword) = &param.keyword {
            validation::length("keyword", keyword, 0, 256)?;
        }
        let offset = offset(param.page, param.total_items)?;

        let found = self
            .files
            .search_file(repo::SearchFileParam {
                keyword: param.keyword,
                statuses: param.statuses,
                visibilities: param.visibilities,
                extensions: param.extensions,
                size_gte: param.size_gte,
                size_lte: param.size_lte,
                upload_date_gte: param.upload_date_gte,
                upload_date_lte: param.upload_date_lte,
                sort: param.sort,
                offset,
                limit: param.total_items,
            })
            .await
            .map_err(repo_failure)?;

        Ok(SearchFileResult {
            summary: SearchSummary {
                page: param.page,
                total_items: found.total_items,
            },
            items: found.items,
        })
    }

    /// Marks the file deleted and queues one deletion per location. The file
    /// stays deleted even when publishing fails part way.
    pub async fn delete_file_by_id(&self, id: Uuid) -> AppResult<DeleteFileResult> {
        validate_id("id", id)?;

        let file = self
            .find_file(FindFileParam::Id(id), MSG_FILE_NOT_AVAILABLE)
            .await?;
        if !file.is_available() {
            return Err(AppError::not_found(MSG_FILE_NOT_AVAILABLE));
        }

        let now = now_millis();
        let deleted = self
            .files
            .update_file(UpdateFileParam {
                id,
                expected_status: Some(FileStatus::Available),
                status: Some(FileStatus::Deleted),
                updated_at: now,
                deleted_at: Some(now),
            })
            .await
            .map_err(|err| match err {
                RepoError::NotFound | RepoError::Deleted => {
                    AppError::not_found(MSG_FILE_NOT_AVAILABLE)
                }
                err => repo_failure(err),
            })?;

        let requested_at = deleted.updated_at.unwrap_or(now);
        let messages: Vec<DeleteFileMessage> = file
            .locations
            .iter()
            .map(|location| DeleteFileMessage {
                location_id: location.id,
                barrel_id: location.barrel_id,
                file_id: file.id,
                status: location.status,
                requested_at: to_millis(requested_at),
            })
            .collect();
        self.publish(EXCHANGE_FILE_DELETION, &messages).await?;

        info!(
            "deleted file {}, queued {} location deletion(s)",
            file.id,
            messages.len()
        );
        Ok(DeleteFileResult { requested_at })
    }

    /// Deletes one location's object from its barrel.
    pub async fn proceed_deletion(&self, location_id: Uuid) -> AppResult<ProceedDeletionResult> {
        validate_id("location_id", location_id)?;

        let file = self
            .find_file(FindFileParam::LocationId(location_id), MSG_FILE_NOT_FOUND)
            .await?;
        let location = find_location(&file, location_id)?;
        let prior = location.status;
        prior
            .next(LocationEvent::BeginDeletion)
            .map_err(|err| AppError::forbidden(err.to_string()))?;

        let storage = self.storage(&location.barrel_code)?;

        if !self
            .transition(location, prior, LocationEvent::BeginDeletion, |_| {})
            .await?
        {
            return Err(AppError::forbidden("deletion is already proceeded"));
        }

        if prior == LocationStatus::Available {
            let object_id = location
                .external_id
                .clone()
                .ok_or_else(|| AppError::action_failed(MSG_INVALID_FILE_DATA))?;
            storage
                .delete_object(DeleteObjectParam { object_id })
                .await
                .map_err(|err| {
                    warn!(
                        barrel = %location.barrel_code,
                        "failed to delete location {}: {}", location.id, err
                    );
                    AppError::action_failed(err.to_string())
                })?;
        }

        let deleted_at = now_millis();
        let completed = self
            .transition(
                location,
                LocationStatus::Deleting,
                LocationEvent::CompleteDeletion,
                |param| {
                    param.updated_at = deleted_at;
                    param.deleted_at = Some(deleted_at);
                },
            )
            .await?;
        if !completed {
            warn!("location {} left deleting by a concurrent worker", location.id);
            return Err(AppError::forbidden("deletion is already proceeded"));
        }

        debug!(barrel = %location.barrel_code, "deleted location {}", location.id);
        Ok(ProceedDeletionResult { deleted_at })
    }

    /// Moves up to `max_items` pending locations to `replicating` and queues
    /// them, oldest first.
    pub async fn schedule_replication(&self, max_items: i64) -> AppResult<ScheduleReplicationResult> {
        validation::range("max_items", max_items, 1, MAX_REPLICATION_BATCH)?;

        let pending = self
            .files
            .search_location(SearchLocationParam {
                statuses: vec![LocationStatus::Pending],
                limit: max_items,
            })
            .await
            .map_err(repo_failure)?;
        if pending.is_empty() {
            return Ok(ScheduleReplicationResult { total_items: 0 });
        }
        let scheduled_status = LocationStatus::Pending
            .next(LocationEvent::Schedule)
            .map_err(|err| AppError::forbidden(err.to_string()))?;

        let messages: Vec<ScheduleReplicationMessage> = pending
            .iter()
            .map(|location| ScheduleReplicationMessage {
                location_id: location.id,
                file_id: location.file_id,
                barrel_id: location.barrel_id,
                priority: location.priority,
                status: location.status,
            })
            .collect();

        let scheduled = self
            .files
            .update_location_by_ids(UpdateLocationByIdsParam {
                ids: pending.iter().map(|location| location.id).collect(),
                expected_status: Some(LocationStatus::Pending),
                status: scheduled_status,
                updated_at: now_millis(),
                external_id: None,
                uploaded_at: None,
                deleted_at: None,
            })
            .await
            .map_err(repo_failure)?;
        if scheduled != pending.len() as u64 {
            debug!(
                "{} of {} locations were scheduled by someone else",
                pending.len() as u64 - scheduled,
                pending.len()
            );
        }

        self.publish(EXCHANGE_FILE_REPLICATION, &messages).await?;

        info!("scheduled {} location(s) for replication", messages.len());
        Ok(ScheduleReplicationResult {
            total_items: messages.len() as i64,
        })
    }

    /// Copies the primary object onto a replica location.
    pub async fn proceed_replication(
        &self,
        location_id: Uuid,
    ) -> AppResult<ProceedReplicationResult> {
        validate_id("location_id", location_id)?;

        let file = self
            .find_file(FindFileParam::LocationId(location_id), MSG_FILE_NOT_FOUND)
            .await?;
        let primary = file
            .primary_location()
            .ok_or_else(|| AppError::action_failed(MSG_INVALID_FILE_DATA))?;
        let replica = find_location(&file, location_id)?;
        if replica.status != LocationStatus::Replicating {
            return Err(AppError::forbidden("replication is already proceeded"));
        }

        if !self
            .transition(
                replica,
                LocationStatus::Replicating,
                LocationEvent::BeginUpload,
                |_| {},
            )
            .await?
        {
            return Err(AppError::forbidden("replication is already proceeded"));
        }

        let source = self.storage(&primary.barrel_code)?;
        let target = self.storage(&replica.barrel_code)?;

        let object_id = primary
            .external_id
            .clone()
            .ok_or_else(|| AppError::action_failed(MSG_INVALID_FILE_DATA))?;
        let object = source
            .retrieve_object(RetrieveObjectParam { object_id })
            .await
            .map_err(|err| {
                warn!(
                    barrel = %primary.barrel_code,
                    "failed to read primary of file {}: {}", file.id, err
                );
                AppError::action_failed(err.to_string())
            })?;

        let uploaded = target
            .upload_object(UploadObjectParam {
                data: object.data,
                id: Some(replica.id.to_string()),
                name: Some(file.name.clone()),
                mimetype: Some(file.mimetype.clone()),
                extension: Some(file.extension.clone()).filter(|ext| !ext.is_empty()),
            })
            .await
            .map_err(|err| {
                warn!(
                    barrel = %replica.barrel_code,
                    "failed to replicate file {}: {}", file.id, err
                );
                AppError::action_failed(err.to_string())
            })?;

        let completed = self
            .transition(
                replica,
                LocationStatus::Uploading,
                LocationEvent::CompleteUpload,
                |param| {
                    param.external_id = Some(uploaded.object_id.clone());
                    param.uploaded_at = Some(uploaded.uploaded_at);
                },
            )
            .await?;
        if !completed {
            warn!(
                "replica {} changed state while uploading, object {} is orphaned",
                replica.id, uploaded.object_id
            );
            return Err(AppError::forbidden("replication is already proceeded"));
        }

        info!(
            barrel = %replica.barrel_code,
            "replicated file {} to location {}", file.id, replica.id
        );
        Ok(ProceedReplicationResult {
            location_id: replica.id,
            barrel_id: replica.barrel_id,
            external_id: uploaded.object_id,
            uploaded_at: uploaded.uploaded_at,
        })
    }
}
