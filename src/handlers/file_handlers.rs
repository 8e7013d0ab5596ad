//! File upload, retrieval, deletion and search.
//! Retrieval streams the object body straight from the serving barrel.

use super::{Envelope, parse_id, parse_list};
use crate::{
    errors::{AppError, AppResult},
    models::{
        file::{File, FileMeta, Visibility},
        from_millis,
    },
    services::file_service::{
        DeleteFileResult, RetrieveFileBySlugParam, SearchFileParam, SearchFileResult,
        UploadFileInfo, UploadFileParam, UploadFileResult, UploadFileSetting,
    },
    state::AppState,
    storage::stream_from_bytes,
};
use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use serde::Deserialize;

const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Splits `photo.final.jpg` into `("photo.final", "jpg")`. Names without a
/// dot, or with a leading dot only, have no extension.
fn split_file_name(file_name: &str) -> (String, String) {
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem.to_string(), extension.to_string()),
        _ => (file_name.to_string(), String::new()),
    }
}

struct UploadedPart {
    name: String,
    extension: String,
    mimetype: String,
    data: Bytes,
}

fn multipart_error(err: impl std::fmt::Display) -> AppError {
    AppError::invalid_param(format!("invalid multipart body: {err}"))
}

/// `POST /v1/file`
///
/// Multipart fields: `file` (required), `visibility` (`public` when absent),
/// `barrels` (repeated or comma-separated codes, primary first) and `meta`
/// (JSON object of strings).
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut file = None;
    let mut visibility = Visibility::Public;
    let mut barrels = Vec::new();
    let mut meta = FileMeta::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let (name, extension) = split_file_name(field.file_name().unwrap_or_default());
                let mimetype = field
                    .content_type()
                    .filter(|ct| !ct.is_empty())
                    .unwrap_or(DEFAULT_MIMETYPE)
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some(UploadedPart {
                    name,
                    extension,
                    mimetype,
                    data,
                });
            }
            "visibility" => {
                let raw = field.text().await.map_err(multipart_error)?;
                visibility = parse_list::<Visibility>("visibility", Some(raw.as_str()))?
                    .pop()
                    .ok_or_else(|| AppError::invalid_param("visibility is not specified"))?;
            }
            "barrels" => {
                let raw = field.text().await.map_err(multipart_error)?;
                barrels.extend(
                    raw.split(',')
                        .map(str::trim)
                        .filter(|code| !code.is_empty())
                        .map(String::from),
                );
            }
            "meta" => {
                let raw = field.text().await.map_err(multipart_error)?;
                meta = serde_json::from_str(&raw)
                    .map_err(|_| AppError::invalid_param("meta must be an object of strings"))?;
            }
            _ => {}
        }
    }

    let (info, data) = match file {
        Some(part) => (
            UploadFileInfo {
                name: part.name,
                mimetype: part.mimetype,
                extension: part.extension,
                size: part.data.len() as i64,
                meta,
            },
            Some(stream_from_bytes(part.data)),
        ),
        None => (
            UploadFileInfo {
                name: String::new(),
                mimetype: String::new(),
                extension: String::new(),
                size: 0,
                meta,
            },
            None,
        ),
    };
    let param = UploadFileParam {
        data,
        info,
        setting: UploadFileSetting {
            visibility,
            barrels,
        },
    };

    let uploaded: UploadFileResult = state.files.upload_file(param).await?;
    Ok(Envelope::success("success upload file", uploaded).created())
}

#[derive(Debug, Deserialize)]
pub struct RetrieveFileQuery {
    pub token: Option<String>,
}

/// `GET /file/{slug}` as a streaming response.
pub async fn retrieve_file(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<RetrieveFileQuery>,
) -> Result<Response, AppError> {
    let retrieved = state
        .files
        .retrieve_file_by_slug(RetrieveFileBySlugParam {
            slug,
            token: query.token,
        })
        .await?;

    let mut response = Response::new(Body::from_stream(retrieved.data));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &retrieved.file);
    Ok(response)
}

/// `GET /v1/file/{id}`
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<File>, AppError> {
    let file = state.files.get_file_by_id(parse_id("id", &id)?).await?;
    Ok(Envelope::success("success get file", file))
}

/// `DELETE /v1/file/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<DeleteFileResult>, AppError> {
    let deleted = state.files.delete_file_by_id(parse_id("id", &id)?).await?;
    Ok(Envelope::success("success delete file", deleted))
}

/// Query accepted by `GET /v1/file`. Lists are comma-separated and dates are
/// milliseconds since epoch.
#[derive(Debug, Default, Deserialize)]
pub struct SearchFileQuery {
    pub keyword: Option<String>,
    pub status_in: Option<String>,
    pub visibility_in: Option<String>,
    pub extension_in: Option<String>,
    pub size_gte: Option<i64>,
    pub size_lte: Option<i64>,
    pub upload_date_gte: Option<i64>,
    pub upload_date_lte: Option<i64>,
    pub page: Option<i64>,
    pub total_items: Option<i64>,
    pub sort: Option<String>,
}

impl SearchFileQuery {
    fn into_param(self) -> AppResult<SearchFileParam> {
        let sort = match self.sort.as_deref() {
            Some(sort) => parse_list("sort", Some(sort))?
                .pop()
                .unwrap_or_default(),
            None => Default::default(),
        };

        Ok(SearchFileParam {
            keyword: self.keyword.filter(|keyword| !keyword.is_empty()),
            statuses: parse_list("status_in", self.status_in.as_deref())?,
            visibilities: parse_list("visibility_in", self.visibility_in.as_deref())?,
            extensions: self
                .extension_in
                .as_deref()
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|ext| !ext.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            size_gte: self.size_gte,
            size_lte: self.size_lte,
            upload_date_gte: self.upload_date_gte.map(from_millis),
            upload_date_lte: self.upload_date_lte.map(from_millis),
            page: self.page.unwrap_or(1),
            total_items: self.total_items.unwrap_or(24),
            sort,
        })
    }
}

/// `GET /v1/file`
pub async fn search_file(
    State(state): State<AppState>,
    query: Result<Query<SearchFileQuery>, QueryRejection>,
) -> Result<Envelope<SearchFileResult>, AppError> {
    let Query(query) = query.map_err(|err| AppError::invalid_param(err.body_text()))?;
    let found = state.files.search_file(query.into_param()?).await?;
    Ok(Envelope::success("success search file", found))
}

fn set_file_headers(headers: &mut HeaderMap, file: &File) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.mimetype)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIMETYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size.max(0)));
    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&file.uploaded_at.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
}
