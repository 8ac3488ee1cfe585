//! FDS client: signed request execution plus thin bucket, object, ACL and
//! metadata operations.
//!
//! Every call goes through [`FdsClient::execute`], which stamps a `Date`
//! header, signs the request with Galaxy-V2 and hands it to the configured
//! [`Transport`]. Non-2xx responses come back verbatim as
//! [`FdsError::ServerRejection`]; nothing here retries them.

use crate::config::{ClientConfig, Profile};
use crate::fds::listing::ListingPaginator;
use crate::fds::multipart::MultipartUploadCoordinator;
use crate::fds::presign::PresignedUrlBuilder;
use crate::fds::signer::{
    encode_path, resource_path, CanonicalRequest, Credentials, Signer, SigningTime, SubResource,
    CONTENT_MD5, XIAOMI_DATE,
};
use crate::fds::transport::{HttpRequest, HttpResponse, HyperTransport, Transport};
use crate::fds::types::{
    AccessControlList, BucketList, FdsObject, Grant, ObjectListing, ObjectMetadata, Permission,
    PutObjectResult, ALL_USERS,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use bytes::Bytes;
use futures::TryStreamExt;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, DATE, RANGE};
use hyper::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// FDS client errors
#[derive(Error, Debug)]
pub enum FdsError {
    /// Credentials or request description could not be turned into a signature
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// The service answered with a non-2xx status. `message` is the body
    /// decoded lossily for display; `body` keeps the raw bytes.
    #[error("FDS error: {status} - {message}")]
    ServerRejection {
        status: StatusCode,
        message: String,
        body: Bytes,
    },

    /// An operation was called out of protocol order
    #[error("Sequencing violation: {0}")]
    Sequencing(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FdsError {
    /// HTTP status of a server rejection
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FdsError::ServerRejection { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, FdsError>;

/// Where requests go. `host` may carry a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    https: bool,
    host: String,
    cdn_host: Option<String>,
}

impl Endpoint {
    pub const DEFAULT_REGION: &'static str = "cnbj0";

    /// Accepts a bare host or a full `http(s)://host` URL; an explicit
    /// scheme overrides `https`.
    pub fn new(host: &str, https: bool) -> Self {
        let (https, host) = if let Some(rest) = host.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = host.strip_prefix("http://") {
            (false, rest)
        } else {
            (https, host)
        };
        Self {
            https,
            host: host.trim_end_matches('/').to_string(),
            cdn_host: None,
        }
    }

    /// `<region>.fds.api.xiaomi.com`, defaulting to `cnbj0`
    pub fn for_region(region: &str, https: bool) -> Self {
        let region = if region.is_empty() {
            Self::DEFAULT_REGION
        } else {
            region
        };
        Self::new(&format!("{}.fds.api.xiaomi.com", region), https)
    }

    /// Route unsigned downloads through `cdn.<region>.fds.api.mi-img.com`
    pub fn with_cdn(mut self, region: &str) -> Self {
        let region = if region.is_empty() {
            Self::DEFAULT_REGION
        } else {
            region
        };
        self.cdn_host = Some(format!("cdn.{}.fds.api.mi-img.com", region));
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_https(&self) -> bool {
        self.https
    }

    fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.host)
    }

    /// Base URL for public downloads (CDN when configured)
    pub fn download_base_url(&self) -> String {
        match &self.cdn_host {
            Some(cdn) => format!("{}://{}", self.scheme(), cdn),
            None => self.base_url(),
        }
    }
}

/// Description of one signed call, before signing
#[derive(Debug)]
pub(crate) struct FdsRequest {
    method: Method,
    bucket: Option<String>,
    object: Option<String>,
    params: Vec<SubResource>,
    headers: HeaderMap,
    body: Bytes,
}

impl FdsRequest {
    pub(crate) fn new(method: Method) -> Self {
        Self {
            method,
            bucket: None,
            object: None,
            params: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub(crate) fn bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }

    pub(crate) fn object(mut self, object: &str) -> Self {
        self.object = Some(object.to_string());
        self
    }

    /// Add a query parameter; whether it is signed depends on the whitelist
    pub(crate) fn param(mut self, param: SubResource) -> Self {
        self.params.push(param);
        self
    }

    pub(crate) fn param_if(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) if !value.is_empty() => self.param(SubResource::with_value(name, value)),
            _ => self,
        }
    }

    pub(crate) fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            FdsError::Authorization(format!("invalid value for header {}: {}", name, e))
        })?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub(crate) fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub(crate) fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        self.header(CONTENT_TYPE, "application/json")
            .map(|req| req.body(Bytes::from(body)))
    }
}

/// RFC 1123 timestamp for the `Date` header
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Client for one FDS endpoint and credential pair.
///
/// Clone is cheap - the transport is shared behind an `Arc`.
#[derive(Clone)]
pub struct FdsClient {
    transport: Arc<dyn Transport>,
    signer: Signer,
    endpoint: Endpoint,
}

impl FdsClient {
    /// Client over the default hyper transport
    pub fn new(credentials: Credentials, endpoint: Endpoint) -> Result<Self> {
        let transport = HyperTransport::new(&ClientConfig::default().transport())?;
        Ok(Self::with_transport(credentials, endpoint, Arc::new(transport)))
    }

    /// Client over any transport (mocks, instrumented stacks)
    pub fn with_transport(
        credentials: Credentials,
        endpoint: Endpoint,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            transport,
            signer: Signer::new(credentials),
            endpoint,
        }
    }

    /// Build from a configuration profile
    pub fn from_profile(profile: &Profile, client: &ClientConfig) -> Result<Self> {
        let credentials = Credentials::new(&profile.access_key, &profile.secret_key)?;
        let transport = HyperTransport::new(&client.transport())?;
        Ok(Self::with_transport(
            credentials,
            profile.endpoint(),
            Arc::new(transport),
        ))
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Multipart upload lifecycle operations
    pub fn multipart(&self) -> MultipartUploadCoordinator<'_> {
        MultipartUploadCoordinator::new(self)
    }

    /// Paginated object listing
    pub fn listing(&self) -> ListingPaginator<'_> {
        ListingPaginator::new(self)
    }

    fn url_for(&self, resource: &str, params: &[SubResource]) -> String {
        let encoded = encode_path(resource);
        let base = self.endpoint.base_url();
        let mut url = String::with_capacity(base.len() + encoded.len() + 64);
        url.push_str(&base);
        url.push_str(&encoded);
        for (i, param) in params.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            param.encode_into(&mut url);
        }
        url
    }

    /// Sign and send a request. Non-2xx statuses become `ServerRejection`.
    pub(crate) async fn execute(&self, mut request: FdsRequest) -> Result<HttpResponse> {
        if !request.headers.contains_key(DATE) && !request.headers.contains_key(XIAOMI_DATE) {
            let date = HeaderValue::from_str(&http_date())
                .map_err(|e| FdsError::Authorization(format!("invalid date header: {}", e)))?;
            request.headers.insert(DATE, date);
        }

        let resource = resource_path(request.bucket.as_deref(), request.object.as_deref());
        let authorization = {
            let canonical = CanonicalRequest::new(
                &request.method,
                &resource,
                &request.params,
                &request.headers,
                SigningTime::from_headers(&request.headers),
            );
            self.signer.authorization(&canonical)
        };
        let authorization = HeaderValue::from_str(&authorization)
            .map_err(|e| FdsError::Authorization(format!("invalid authorization header: {}", e)))?;
        request.headers.insert(AUTHORIZATION, authorization);

        let url = self.url_for(&resource, &request.params);
        tracing::debug!(method = %request.method, url = %url, "fds request");

        let response = self
            .transport
            .send(HttpRequest {
                method: request.method,
                url,
                headers: request.headers,
                body: request.body,
            })
            .await?;

        if !response.status.is_success() {
            let message = String::from_utf8_lossy(&response.body).to_string();
            tracing::debug!(status = %response.status, message = %message, "fds rejection");
            return Err(FdsError::ServerRejection {
                status: response.status,
                message,
                body: response.body,
            });
        }

        Ok(response)
    }

    /// Execute and decode a JSON body
    pub(crate) async fn execute_json<T: DeserializeOwned>(&self, request: FdsRequest) -> Result<T> {
        let response = self.execute(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// HEAD-style existence check: 404 means "no", anything else non-2xx is an error
    async fn exists(&self, request: FdsRequest) -> Result<bool> {
        match self.execute(request).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Presigned URLs
    // =========================================================================

    /// Presigned URL valid until `expires_at_millis` (epoch milliseconds)
    pub fn presigned_url(
        &self,
        bucket: &str,
        object: &str,
        method: &Method,
        sub_resources: &[SubResource],
        expires_at_millis: i64,
        headers: &HeaderMap,
    ) -> String {
        let base_url = self.endpoint.base_url();
        PresignedUrlBuilder::new(&self.signer, &base_url).build_url(
            bucket,
            object,
            method,
            sub_resources,
            expires_at_millis,
            headers,
        )
    }

    /// Presigned URL valid for `expires_in` from now, no extra headers
    pub fn presigned_url_for(
        &self,
        bucket: &str,
        object: &str,
        method: &Method,
        expires_in: Duration,
    ) -> String {
        let expires_in = i64::try_from(expires_in.as_millis()).unwrap_or(i64::MAX);
        let expires = chrono::Utc::now()
            .timestamp_millis()
            .saturating_add(expires_in);
        self.presigned_url(bucket, object, method, &[], expires, &HeaderMap::new())
    }

    /// Unsigned URI for publicly readable objects
    pub fn download_uri(&self, bucket: &str, object: &str) -> String {
        let resource = resource_path(Some(bucket), Some(object));
        format!(
            "{}{}",
            self.endpoint.download_base_url(),
            encode_path(&resource)
        )
    }

    // =========================================================================
    // Bucket Operations
    // =========================================================================

    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.execute(FdsRequest::new(Method::PUT).bucket(bucket))
            .await?;
        tracing::info!(bucket = %bucket, "bucket created");
        Ok(())
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.execute(FdsRequest::new(Method::DELETE).bucket(bucket))
            .await?;
        tracing::info!(bucket = %bucket, "bucket deleted");
        Ok(())
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.exists(FdsRequest::new(Method::HEAD).bucket(bucket))
            .await
    }

    pub async fn list_buckets(&self) -> Result<BucketList> {
        self.execute_json(FdsRequest::new(Method::GET)).await
    }

    // =========================================================================
    // Object Operations
    // =========================================================================

    /// Put an object. `metadata` user entries travel as `x-xiaomi-meta-*`
    /// headers; the body's MD5 is sent (and signed) as `Content-MD5`.
    pub async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<PutObjectResult> {
        let data = data.into();
        let request = FdsRequest::new(Method::PUT).bucket(bucket).object(object);
        let request = Self::with_content_headers(request, &data, content_type, metadata)?;
        let response = self.execute(request.body(data)).await?;
        tracing::debug!(bucket = %bucket, object = %object, "object stored");
        Self::put_result(&response, bucket, object)
    }

    /// Store an object under a server-chosen name
    pub async fn post_object(
        &self,
        bucket: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> Result<PutObjectResult> {
        let data = data.into();
        let request = FdsRequest::new(Method::POST).bucket(bucket).object("");
        let request = Self::with_content_headers(request, &data, content_type, None)?;
        self.execute_json(request.body(data)).await
    }

    fn with_content_headers(
        mut request: FdsRequest,
        data: &Bytes,
        content_type: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<FdsRequest> {
        let md5 = BASE64.encode(Md5::digest(data));
        request = request.header(HeaderName::from_static(CONTENT_MD5), &md5)?;
        if let Some(content_type) = content_type.filter(|c| !c.is_empty()) {
            request = request.header(CONTENT_TYPE, content_type)?;
        }
        if let Some(metadata) = metadata {
            for (name, value) in metadata.user_metadata() {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    FdsError::Authorization(format!("invalid metadata key {}: {}", name, e))
                })?;
                request = request.header(name, value)?;
            }
        }
        Ok(request)
    }

    fn put_result(response: &HttpResponse, bucket: &str, object: &str) -> Result<PutObjectResult> {
        if response.body.is_empty() {
            return Ok(PutObjectResult {
                bucket_name: bucket.to_string(),
                object_name: object.to_string(),
                ..Default::default()
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn get_object(&self, bucket: &str, object: &str) -> Result<FdsObject> {
        self.get_object_range(bucket, object, 0, None).await
    }

    /// Fetch `bytes=start-end` (inclusive); `end = None` reads to the end
    pub async fn get_object_range(
        &self,
        bucket: &str,
        object: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<FdsObject> {
        let mut request = FdsRequest::new(Method::GET).bucket(bucket).object(object);
        let range = match end {
            Some(end) => Some(format!("bytes={}-{}", start, end)),
            None if start > 0 => Some(format!("bytes={}-", start)),
            None => None,
        };
        if let Some(range) = range {
            request = request.header(RANGE, &range)?;
        }

        let response = self.execute(request).await?;
        Ok(FdsObject {
            bucket_name: bucket.to_string(),
            object_name: object.to_string(),
            metadata: ObjectMetadata::from_headers(&response.headers),
            content: response.body,
        })
    }

    pub async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        self.execute(FdsRequest::new(Method::DELETE).bucket(bucket).object(object))
            .await?;
        Ok(())
    }

    /// Delete up to one page of objects in a single call
    pub async fn delete_objects(&self, bucket: &str, objects: &[String]) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let request = FdsRequest::new(Method::PUT)
            .bucket(bucket)
            .param(SubResource::flag("deleteObjects"))
            .json(&objects)?;
        self.execute(request).await?;
        Ok(())
    }

    /// Delete every object under `prefix`, returning how many were removed
    pub async fn delete_objects_with_prefix(&self, bucket: &str, prefix: &str) -> Result<usize> {
        let mut deleted = 0;
        let mut pages = Box::pin(self.listing().pages(bucket, prefix, "", 1000));
        while let Some(page) = pages.try_next().await? {
            let names: Vec<String> = page.object_names().map(str::to_string).collect();
            self.delete_objects(bucket, &names).await?;
            deleted += names.len();
        }
        tracing::info!(bucket = %bucket, prefix = %prefix, deleted, "objects deleted");
        Ok(deleted)
    }

    pub async fn object_exists(&self, bucket: &str, object: &str) -> Result<bool> {
        self.exists(FdsRequest::new(Method::HEAD).bucket(bucket).object(object))
            .await
    }

    pub async fn get_object_metadata(&self, bucket: &str, object: &str) -> Result<ObjectMetadata> {
        let response = self
            .execute(FdsRequest::new(Method::HEAD).bucket(bucket).object(object))
            .await?;
        Ok(ObjectMetadata::from_headers(&response.headers))
    }

    /// First page of a listing; see [`ListingPaginator`] for continuation
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
    ) -> Result<ObjectListing> {
        self.listing().list(bucket, prefix, delimiter, max_keys).await
    }

    pub async fn list_next_batch_of_objects(&self, previous: &ObjectListing) -> Result<ObjectListing> {
        self.listing().next_batch(previous).await
    }

    // =========================================================================
    // ACL Operations
    // =========================================================================

    pub async fn get_object_acl(&self, bucket: &str, object: &str) -> Result<AccessControlList> {
        self.execute_json(
            FdsRequest::new(Method::GET)
                .bucket(bucket)
                .object(object)
                .param(SubResource::flag("acl")),
        )
        .await
    }

    pub async fn set_object_acl(
        &self,
        bucket: &str,
        object: &str,
        acl: &AccessControlList,
    ) -> Result<()> {
        let request = FdsRequest::new(Method::PUT)
            .bucket(bucket)
            .object(object)
            .param(SubResource::flag("acl"))
            .json(acl)?;
        self.execute(request).await?;
        Ok(())
    }

    /// Grant READ to everyone
    pub async fn set_public(&self, bucket: &str, object: &str) -> Result<()> {
        let acl = AccessControlList::default().grant(Grant::group(ALL_USERS, Permission::Read));
        self.set_object_acl(bucket, object, &acl).await
    }
}
