//! Multipart upload lifecycle
//!
//! ```text
//! init ──► Initiated ──upload_part──► PartsUploading ──complete──► Completed
//!              │                            │
//!              └────────────abort───────────┴──────────────────► Aborted
//! ```
//!
//! [`MultipartSession`] is the handle for a live upload. `complete` and
//! `abort` take it by value, so a part upload after either is rejected by
//! the compiler rather than at runtime. On failure both hand the session
//! back inside [`SessionFailure`] so the caller can retry or abort.
//!
//! Part uploads borrow the session and may run concurrently; the server
//! keys each part by `(uploadId, partNumber)` and overwrites on re-upload.
//!
//! A session rebuilt with [`MultipartSession::resume`] after an abort is
//! still accepted by this module. Whether the server rejects the part is
//! the server's contract; callers must not rely on it.

use crate::fds::client::{FdsClient, FdsError, FdsRequest, Result};
use crate::fds::signer::SubResource;
use crate::fds::types::{
    InitMultipartUploadResult, ListPartsResult, MultipartConfig, MultipartUploadListing,
    PutObjectResult, UploadPartList, UploadPartResult,
};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use hyper::header::CONTENT_TYPE;
use hyper::Method;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::{AsyncReadExt, BufReader};

/// Lifecycle state of a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    /// Upload ID allocated, no part uploaded yet
    Initiated,
    /// At least one part uploaded
    PartsUploading,
    Completed,
    Aborted,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Aborted)
    }

    pub fn on_part_uploaded(self) -> Result<Self> {
        match self {
            UploadState::Initiated | UploadState::PartsUploading => Ok(UploadState::PartsUploading),
            other => Err(illegal(other, "upload a part")),
        }
    }

    pub fn on_complete(self) -> Result<Self> {
        match self {
            UploadState::Initiated | UploadState::PartsUploading => Ok(UploadState::Completed),
            other => Err(illegal(other, "complete")),
        }
    }

    pub fn on_abort(self) -> Result<Self> {
        match self {
            UploadState::Initiated | UploadState::PartsUploading => Ok(UploadState::Aborted),
            other => Err(illegal(other, "abort")),
        }
    }
}

fn illegal(state: UploadState, action: &str) -> FdsError {
    FdsError::Sequencing(format!("cannot {} an upload in state {:?}", action, state))
}

/// Handle for an in-progress upload.
///
/// Not `Clone`: exactly one owner can complete or abort it.
#[derive(Debug)]
pub struct MultipartSession {
    bucket: String,
    object: String,
    upload_id: String,
    content_type: Option<String>,
    parts_started: AtomicBool,
}

impl MultipartSession {
    fn from_init(result: InitMultipartUploadResult, content_type: Option<&str>) -> Self {
        Self {
            bucket: result.bucket_name,
            object: result.object_name,
            upload_id: result.upload_id,
            content_type: content_type
                .map(str::to_string)
                .or(result.upload_type),
            parts_started: AtomicBool::new(false),
        }
    }

    /// Rebuild a handle for an upload ID obtained elsewhere (for example
    /// from [`MultipartUploadCoordinator::list_uploads`])
    pub fn resume(
        bucket: impl Into<String>,
        object: impl Into<String>,
        upload_id: impl Into<String>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            upload_id: upload_id.into(),
            content_type,
            parts_started: AtomicBool::new(false),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Live sessions are only ever `Initiated` or `PartsUploading`
    pub fn state(&self) -> UploadState {
        if self.parts_started.load(Ordering::Acquire) {
            UploadState::PartsUploading
        } else {
            UploadState::Initiated
        }
    }

    fn mark_part_uploaded(&self) {
        self.parts_started.store(true, Ordering::Release);
    }
}

/// A failed `complete` or `abort`, with the session handed back
#[derive(Error, Debug)]
#[error("multipart upload {}: {error}", .session.upload_id)]
pub struct SessionFailure {
    pub session: MultipartSession,
    #[source]
    pub error: FdsError,
}

impl From<SessionFailure> for FdsError {
    fn from(failure: SessionFailure) -> Self {
        failure.error
    }
}

/// Result of a successful `complete`
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub upload_id: String,
    pub result: PutObjectResult,
}

impl CompletedUpload {
    pub fn state(&self) -> UploadState {
        UploadState::Completed
    }
}

/// Result of a successful `abort`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedUpload {
    pub bucket: String,
    pub object: String,
    pub upload_id: String,
}

impl AbortedUpload {
    pub fn state(&self) -> UploadState {
        UploadState::Aborted
    }
}

/// Multipart operations over one client. Holds no state of its own.
#[derive(Clone, Copy)]
pub struct MultipartUploadCoordinator<'a> {
    client: &'a FdsClient,
}

impl<'a> MultipartUploadCoordinator<'a> {
    pub fn new(client: &'a FdsClient) -> Self {
        Self { client }
    }

    /// `PUT /<bucket>/<object>?uploads`
    pub async fn init(
        &self,
        bucket: &str,
        object: &str,
        content_type: Option<&str>,
    ) -> Result<MultipartSession> {
        let mut request = FdsRequest::new(Method::PUT)
            .bucket(bucket)
            .object(object)
            .param(SubResource::flag("uploads"));
        if let Some(content_type) = content_type.filter(|c| !c.is_empty()) {
            request = request.header(CONTENT_TYPE, content_type)?;
        }

        let result: InitMultipartUploadResult = self.client.execute_json(request).await?;
        if result.upload_id.is_empty() {
            return Err(FdsError::InvalidResponse(
                "init response carries no upload ID".to_string(),
            ));
        }
        tracing::info!(
            bucket = %bucket,
            object = %object,
            upload_id = %result.upload_id,
            "multipart upload initiated"
        );
        Ok(MultipartSession::from_init(result, content_type))
    }

    /// `PUT /<bucket>/<object>?partNumber=N&uploadId=ID`
    ///
    /// Part numbers are 1-based and may arrive in any order. Re-uploading a
    /// number replaces the earlier bytes.
    pub async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartResult> {
        if part_number == 0 {
            return Err(FdsError::Authorization(
                "part numbers start at 1".to_string(),
            ));
        }
        session.state().on_part_uploaded()?;

        let size = data.len() as u64;
        let request = FdsRequest::new(Method::PUT)
            .bucket(&session.bucket)
            .object(&session.object)
            .param(SubResource::part_number(part_number))
            .param(SubResource::upload_id(&session.upload_id))
            .body(data);

        let mut part: UploadPartResult = self.client.execute_json(request).await?;
        if part.part_size == 0 {
            part.part_size = size;
        }
        session.mark_part_uploaded();
        tracing::debug!(
            upload_id = %session.upload_id,
            part_number,
            size,
            "part uploaded"
        );
        Ok(part)
    }

    /// `PUT /<bucket>/<object>?uploadId=ID` with the part list as body.
    ///
    /// `parts` must be strictly ascending by part number; gaps are left to
    /// the server to judge.
    pub async fn complete(
        &self,
        session: MultipartSession,
        parts: &[UploadPartResult],
    ) -> std::result::Result<CompletedUpload, SessionFailure> {
        match self.try_complete(&session, parts).await {
            Ok(result) => {
                tracing::info!(
                    upload_id = %session.upload_id,
                    parts = parts.len(),
                    "multipart upload completed"
                );
                Ok(CompletedUpload {
                    upload_id: session.upload_id,
                    result,
                })
            }
            Err(error) => Err(SessionFailure { session, error }),
        }
    }

    async fn try_complete(
        &self,
        session: &MultipartSession,
        parts: &[UploadPartResult],
    ) -> Result<PutObjectResult> {
        session.state().on_complete()?;
        if let Some(pair) = parts
            .windows(2)
            .find(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(FdsError::Sequencing(format!(
                "parts must be strictly ascending, found {} before {}",
                pair[0].part_number, pair[1].part_number
            )));
        }

        let body = UploadPartList {
            upload_part_result_list: parts.to_vec(),
        };
        let request = FdsRequest::new(Method::PUT)
            .bucket(&session.bucket)
            .object(&session.object)
            .param(SubResource::upload_id(&session.upload_id))
            .json(&body)?;
        let response = self.client.execute(request).await?;
        if response.body.is_empty() {
            return Ok(PutObjectResult {
                bucket_name: session.bucket.clone(),
                object_name: session.object.clone(),
                ..Default::default()
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// `DELETE /<bucket>/<object>?uploadId=ID`
    pub async fn abort(
        &self,
        session: MultipartSession,
    ) -> std::result::Result<AbortedUpload, SessionFailure> {
        let outcome = match session.state().on_abort() {
            Ok(_) => {
                let request = FdsRequest::new(Method::DELETE)
                    .bucket(&session.bucket)
                    .object(&session.object)
                    .param(SubResource::upload_id(&session.upload_id));
                self.client.execute(request).await.map(|_| ())
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(upload_id = %session.upload_id, "multipart upload aborted");
                Ok(AbortedUpload {
                    bucket: session.bucket,
                    object: session.object,
                    upload_id: session.upload_id,
                })
            }
            Err(error) => Err(SessionFailure { session, error }),
        }
    }

    /// `GET /<bucket>/<object>?uploadId=ID`
    pub async fn list_parts(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<ListPartsResult> {
        self.client
            .execute_json(
                FdsRequest::new(Method::GET)
                    .bucket(bucket)
                    .object(object)
                    .param(SubResource::upload_id(upload_id)),
            )
            .await
    }

    /// `GET /<bucket>?uploads&prefix=..&maxKeys=..&marker=..`
    pub async fn list_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        max_uploads: u32,
    ) -> Result<MultipartUploadListing> {
        let max_keys = max_uploads.to_string();
        let request = FdsRequest::new(Method::GET)
            .bucket(bucket)
            .param(SubResource::flag("uploads"))
            .param_if("prefix", Some(prefix))
            .param_if("maxKeys", (max_uploads > 0).then_some(max_keys.as_str()))
            .param_if("marker", Some(marker));
        self.client.execute_json(request).await
    }

    /// Continue an uploads listing from the server's marker
    pub async fn next_uploads_batch(
        &self,
        previous: &MultipartUploadListing,
    ) -> Result<MultipartUploadListing> {
        if !previous.truncated {
            return Err(FdsError::Sequencing(
                "uploads listing is not truncated; there is no next batch".to_string(),
            ));
        }
        let marker = previous.next_marker.as_deref().ok_or_else(|| {
            FdsError::InvalidResponse("truncated uploads listing has no next marker".to_string())
        })?;
        self.list_uploads(
            &previous.bucket_name,
            &previous.prefix,
            marker,
            previous.max_keys,
        )
        .await
    }

    /// Upload `data` in parts of `config.part_size` with at most
    /// `config.concurrency` in flight, then complete. Below
    /// `config.threshold`, or when `data` is empty, this is a single put.
    /// Any failed part aborts the whole upload.
    pub async fn upload_multipart(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        content_type: Option<&str>,
        config: &MultipartConfig,
    ) -> Result<PutObjectResult> {
        if data.is_empty() || (data.len() as u64) < config.threshold {
            return self
                .client
                .put_object(bucket, object, data, content_type, None)
                .await;
        }

        let session = self.init(bucket, object, content_type).await?;

        let part_size = config.part_size.max(1);
        let chunks: Vec<Result<(u32, Bytes)>> = (0..data.len())
            .step_by(part_size)
            .enumerate()
            .map(|(i, start)| {
                let end = std::cmp::min(start + part_size, data.len());
                Ok(((i + 1) as u32, data.slice(start..end)))
            })
            .collect();
        tracing::debug!(
            upload_id = %session.upload_id(),
            parts = chunks.len(),
            "uploading parts"
        );

        let parts = self
            .upload_parts(&session, stream::iter(chunks), config.concurrency)
            .await;
        self.finish(session, parts).await
    }

    /// Upload a local file. Large files are read one part at a time, so at
    /// most `config.concurrency` parts are held in memory.
    pub async fn upload_file(
        &self,
        bucket: &str,
        object: &str,
        path: &Path,
        content_type: Option<&str>,
        config: &MultipartConfig,
    ) -> Result<PutObjectResult> {
        let file_size = tokio::fs::metadata(path).await?.len();
        if file_size == 0 || file_size < config.threshold {
            let data = tokio::fs::read(path).await?;
            return self
                .client
                .put_object(bucket, object, data, content_type, None)
                .await;
        }

        let file = tokio::fs::File::open(path).await?;
        let session = self.init(bucket, object, content_type).await?;

        let part_size = config.part_size.max(1);
        tracing::debug!(
            upload_id = %session.upload_id(),
            path = %path.display(),
            file_size,
            "uploading file parts"
        );

        let reader = BufReader::with_capacity(part_size, file);
        let chunks = stream::try_unfold((reader, 1u32), move |(mut reader, part_number)| async move {
            let mut buffer = Vec::with_capacity(part_size);
            (&mut reader)
                .take(part_size as u64)
                .read_to_end(&mut buffer)
                .await?;
            if buffer.is_empty() {
                return Ok(None);
            }
            Ok::<_, FdsError>(Some((
                (part_number, Bytes::from(buffer)),
                (reader, part_number + 1),
            )))
        });

        let parts = self
            .upload_parts(&session, chunks, config.concurrency)
            .await;
        self.finish(session, parts).await
    }

    async fn upload_parts<S>(
        &self,
        session: &MultipartSession,
        chunks: S,
        concurrency: usize,
    ) -> Result<UploadPartList>
    where
        S: Stream<Item = Result<(u32, Bytes)>>,
    {
        let results: Vec<UploadPartResult> = chunks
            .map(|chunk| async move {
                let (part_number, data) = chunk?;
                self.upload_part(session, part_number, data).await
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;
        Ok(results.into_iter().collect())
    }

    /// Complete on success; abort when parts or `complete` failed
    async fn finish(
        &self,
        session: MultipartSession,
        parts: Result<UploadPartList>,
    ) -> Result<PutObjectResult> {
        let parts = match parts {
            Ok(parts) => parts,
            Err(err) => {
                self.abort_after_failure(session, "part upload").await;
                return Err(err);
            }
        };

        match self.complete(session, parts.parts()).await {
            Ok(completed) => Ok(completed.result),
            Err(SessionFailure { session, error }) => {
                self.abort_after_failure(session, "complete").await;
                Err(error)
            }
        }
    }

    async fn abort_after_failure(&self, session: MultipartSession, stage: &str) {
        if let Err(failure) = self.abort(session).await {
            tracing::warn!(
                upload_id = %failure.session.upload_id(),
                stage,
                error = %failure.error,
                "abort after failed upload also failed"
            );
        }
    }
}
