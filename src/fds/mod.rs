//! Galaxy FDS client with Galaxy-V2 signing
//!
//! This module provides:
//! - Galaxy-V2 (HMAC-SHA1) request signing and presigned URLs
//! - Multipart upload lifecycle with a typed session state machine
//! - Marker-based listing pagination
//! - Bucket, object, ACL and metadata operations over a pluggable transport

pub mod client;
pub mod listing;
pub mod multipart;
pub mod presign;
pub mod signer;
pub mod transport;
pub mod types;

pub use client::{Endpoint, FdsClient, FdsError, Result};
pub use listing::ListingPaginator;
pub use multipart::{
    AbortedUpload, CompletedUpload, MultipartSession, MultipartUploadCoordinator, SessionFailure,
    UploadState,
};
pub use presign::PresignedUrlBuilder;
pub use signer::{CanonicalRequest, Credentials, Signer, SigningTime, SubResource};
pub use transport::{HttpRequest, HttpResponse, HyperTransport, Transport, TransportConfig};
pub use types::{
    AccessControlList, FdsObject, Grant, InitMultipartUploadResult, ListPartsResult,
    MultipartConfig, MultipartUploadListing, ObjectListing, ObjectMetadata, ObjectSummary,
    Permission, PutObjectResult, UploadPartList, UploadPartResult,
};
