//! FDS types and response structures
//!
//! Every body the service exchanges is JSON with camelCase field names.

use crate::fds::client::{FdsError, Result};
use crate::fds::signer::XIAOMI_META_PREFIX;
use bytes::Bytes;
use hyper::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Owner of a bucket or object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

// =============================================================================
// Listing Types
// =============================================================================

/// One object in a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    /// Full object key
    #[serde(rename = "name")]
    pub object_name: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub owner: Option<Owner>,
    /// Epoch milliseconds
    #[serde(default)]
    pub upload_time: Option<i64>,
}

/// One page of a prefix/delimiter listing.
///
/// `next_marker` is the server's cursor and is only ever echoed back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectListing {
    #[serde(default, rename = "name")]
    pub bucket_name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub delimiter: String,
    #[serde(default)]
    pub marker: String,
    #[serde(default)]
    pub max_keys: u32,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub next_marker: Option<String>,
    #[serde(default, rename = "objects")]
    pub object_summaries: Vec<ObjectSummary>,
    #[serde(default)]
    pub common_prefixes: Vec<String>,
}

impl ObjectListing {
    pub fn is_empty(&self) -> bool {
        self.object_summaries.is_empty() && self.common_prefixes.is_empty()
    }

    /// Keys of the object summaries, in page order
    pub fn object_names(&self) -> impl Iterator<Item = &str> {
        self.object_summaries.iter().map(|o| o.object_name.as_str())
    }
}

/// Bucket entry from the service-level listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub name: String,
    #[serde(default)]
    pub creation_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketList {
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub buckets: Vec<BucketInfo>,
}

// =============================================================================
// Multipart Upload Types
// =============================================================================

/// Response to `PUT /<bucket>/<object>?uploads`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMultipartUploadResult {
    pub bucket_name: String,
    pub object_name: String,
    /// Upload ID for every subsequent part, list, complete and abort call
    pub upload_id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub upload_type: Option<String>,
}

/// Response to a part upload; also the element of the complete body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartResult {
    /// Part number (1-based)
    pub part_number: u32,
    /// ETag of the uploaded part (required for complete)
    pub etag: String,
    #[serde(default)]
    pub part_size: u64,
}

impl UploadPartResult {
    pub fn new(part_number: u32, etag: impl Into<String>, part_size: u64) -> Self {
        Self {
            part_number,
            etag: etag.into(),
            part_size,
        }
    }
}

/// Body of the complete call: `{"uploadPartResultList": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartList {
    #[serde(default)]
    pub upload_part_result_list: Vec<UploadPartResult>,
}

impl UploadPartList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a part. A later result for the same part number replaces the
    /// earlier one, matching the server's overwrite semantics.
    pub fn add(&mut self, part: UploadPartResult) {
        match self
            .upload_part_result_list
            .binary_search_by_key(&part.part_number, |p| p.part_number)
        {
            Ok(idx) => self.upload_part_result_list[idx] = part,
            Err(idx) => self.upload_part_result_list.insert(idx, part),
        }
    }

    pub fn len(&self) -> usize {
        self.upload_part_result_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upload_part_result_list.is_empty()
    }

    pub fn parts(&self) -> &[UploadPartResult] {
        &self.upload_part_result_list
    }

    pub fn total_size(&self) -> u64 {
        self.upload_part_result_list.iter().map(|p| p.part_size).sum()
    }
}

impl FromIterator<UploadPartResult> for UploadPartList {
    fn from_iter<I: IntoIterator<Item = UploadPartResult>>(iter: I) -> Self {
        let mut list = UploadPartList::new();
        for part in iter {
            list.add(part);
        }
        list
    }
}

/// Response to a completed upload or a simple put
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutObjectResult {
    pub bucket_name: String,
    pub object_name: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub expires: Option<i64>,
}

/// Response to `GET /<bucket>/<object>?uploadId=<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPartsResult {
    pub bucket_name: String,
    pub object_name: String,
    pub upload_id: String,
    #[serde(default)]
    pub upload_part_result_list: Vec<UploadPartResult>,
}

/// An in-progress upload as reported by the uploads listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUploadInfo {
    pub object_name: String,
    pub upload_id: String,
    #[serde(default)]
    pub upload_time: Option<i64>,
}

/// One page of `GET /<bucket>?uploads`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUploadListing {
    pub bucket_name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub max_keys: u32,
    #[serde(default)]
    pub marker: String,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub next_marker: Option<String>,
    #[serde(default)]
    pub uploads: Vec<MultipartUploadInfo>,
    #[serde(default)]
    pub common_prefixes: Vec<String>,
}

/// Configuration for the high-level multipart helper
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Part size in bytes (default: 5MB, service minimum except the last part)
    pub part_size: usize,
    /// Maximum concurrent part uploads (default: 10)
    pub concurrency: usize,
    /// Files at or above this size use multipart (default: 100MB)
    pub threshold: u64,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: 5 * 1024 * 1024,
            concurrency: 10,
            threshold: 100 * 1024 * 1024,
        }
    }
}

impl MultipartConfig {
    pub fn with_part_size(mut self, size: usize) -> Self {
        self.part_size = size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }
}

// =============================================================================
// ACL Types
// =============================================================================

pub const ALL_USERS: &str = "ALL_USERS";
pub const AUTHENTICATED_USERS: &str = "AUTHENTICATED_USERS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Read,
    Write,
    ReadObjects,
    SsoWrite,
    FullControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantType {
    User,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grantee {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: Permission,
    #[serde(rename = "type")]
    pub grant_type: GrantType,
}

impl Grant {
    pub fn user(id: impl Into<String>, permission: Permission) -> Self {
        Self {
            grantee: Grantee { id: id.into() },
            permission,
            grant_type: GrantType::User,
        }
    }

    pub fn group(id: impl Into<String>, permission: Permission) -> Self {
        Self {
            grantee: Grantee { id: id.into() },
            permission,
            grant_type: GrantType::Group,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub access_control_list: Vec<Grant>,
}

impl AccessControlList {
    pub fn grant(mut self, grant: Grant) -> Self {
        if !self.access_control_list.contains(&grant) {
            self.access_control_list.push(grant);
        }
        self
    }

    pub fn is_public(&self) -> bool {
        self.access_control_list.iter().any(|g| {
            g.grant_type == GrantType::Group
                && g.grantee.id == ALL_USERS
                && g.permission == Permission::Read
        })
    }
}

// =============================================================================
// Object Types
// =============================================================================

/// Object headers as returned by `HEAD /<bucket>/<object>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    headers: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the standard content headers and every `x-xiaomi-meta-*` header
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut metadata = Self::new();
        for (name, value) in headers {
            let name = name.as_str();
            let keep = name.starts_with(XIAOMI_META_PREFIX)
                || matches!(
                    name,
                    "content-type"
                        | "content-length"
                        | "content-encoding"
                        | "cache-control"
                        | "last-modified"
                        | "content-md5"
                );
            if keep {
                if let Ok(value) = value.to_str() {
                    metadata.headers.insert(name.to_string(), value.to_string());
                }
            }
        }
        metadata
    }

    /// Set a header; names are stored lowercase
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Add a user metadata entry, prefixing `x-xiaomi-meta-` if missing
    pub fn insert_user_metadata(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_ascii_lowercase();
        let name = if key.starts_with(XIAOMI_META_PREFIX) {
            key
        } else {
            format!("{}{}", XIAOMI_META_PREFIX, key)
        };
        self.headers.insert(name, value.into());
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
    }

    /// Look up a header; a missing key is an error, like the service's own
    /// metadata accessor
    pub fn get(&self, name: &str) -> Result<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .ok_or_else(|| FdsError::InvalidResponse(format!("metadata key not found: {}", name)))
    }

    /// `x-xiaomi-meta-*` entries only
    pub fn user_metadata(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(k, _)| k.starts_with(XIAOMI_META_PREFIX))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A downloaded object (or a byte range of it)
#[derive(Debug, Clone)]
pub struct FdsObject {
    pub bucket_name: String,
    pub object_name: String,
    pub metadata: ObjectMetadata,
    pub content: Bytes,
}
