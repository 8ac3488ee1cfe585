//! In-memory FDS service for integration tests.
//!
//! Every request is authenticated the way the real service does it: header
//! mode via `Authorization: Galaxy-V2 ak:sig`, presigned mode via the
//! `GalaxyAccessKeyId`/`Expires`/`Signature` query parameters (with expiry
//! enforced against the wall clock). Bad or expired signatures get a 403.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use md5::{Digest, Md5};
use galaxy_fds::fds::signer::{
    ACCESS_KEY_ID_PARAM, EXPIRES_PARAM, SIGNATURE_PARAM, XIAOMI_META_PREFIX,
};
use galaxy_fds::fds::types::{
    BucketInfo, BucketList, MultipartUploadInfo, ObjectSummary, PutObjectResult,
};
use galaxy_fds::fds::{
    AccessControlList, Credentials, Endpoint, FdsClient, HttpRequest, HttpResponse,
    InitMultipartUploadResult, ListPartsResult, MultipartUploadListing, ObjectListing, Signer,
    SigningTime, SubResource, Transport, UploadPartList, UploadPartResult,
};
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use hyper::{Method, StatusCode, Uri};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const ACCESS_KEY: &str = "AKIDMOCKFDS";
pub const SECRET_KEY: &str = "mock/secret+key==";
pub const BUCKET: &str = "test-bucket";

type FdsResult<T> = galaxy_fds::fds::Result<T>;

struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    metadata: Vec<(String, String)>,
}

struct PendingUpload {
    bucket: String,
    object: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, UploadedPart>,
}

struct UploadedPart {
    etag: String,
    data: Bytes,
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    uploads: BTreeMap<String, PendingUpload>,
    acls: HashMap<(String, String), AccessControlList>,
    next_id: u64,
    log: Vec<(Method, String)>,
}

/// Parsed request target
struct Target {
    resource: String,
    bucket: Option<String>,
    object: Option<String>,
    params: Vec<(String, Option<String>)>,
}

impl Target {
    fn has(&self, name: &str) -> bool {
        self.params.iter().any(|(k, _)| k == name)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    fn sub_resources(&self) -> Vec<SubResource> {
        self.params
            .iter()
            .filter(|(k, _)| {
                k != ACCESS_KEY_ID_PARAM && k != EXPIRES_PARAM && k != SIGNATURE_PARAM
            })
            .map(|(k, v)| match v {
                Some(v) => SubResource::with_value(k.as_str(), v.as_str()),
                None => SubResource::flag(k.as_str()),
            })
            .collect()
    }
}

pub struct MockFds {
    signer: Signer,
    state: Mutex<State>,
}

impl MockFds {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            signer: Signer::new(Credentials::new(ACCESS_KEY, SECRET_KEY).unwrap()),
            state: Mutex::new(State::default()),
        })
    }

    /// Mock with `BUCKET` already created
    pub fn with_bucket() -> Arc<Self> {
        let mock = Self::new();
        mock.state
            .lock()
            .unwrap()
            .buckets
            .insert(BUCKET.to_string(), BTreeMap::new());
        mock
    }

    /// Authenticated requests seen so far, as (method, url)
    pub fn request_log(&self) -> Vec<(Method, String)> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn pending_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    fn parse(url: &str) -> Result<Target, HttpResponse> {
        let uri: Uri = url
            .parse()
            .map_err(|_| error(StatusCode::BAD_REQUEST, "malformed url"))?;
        let resource = decode(uri.path());
        let params = uri
            .query()
            .unwrap_or("")
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (decode(k), Some(decode(v))),
                None => (decode(pair), None),
            })
            .collect();

        let trimmed = resource.trim_start_matches('/');
        let (bucket, object) = if trimmed.is_empty() {
            (None, None)
        } else {
            match trimmed.split_once('/') {
                Some((bucket, object)) => (Some(bucket.to_string()), Some(object.to_string())),
                None => (Some(trimmed.to_string()), None),
            }
        };

        Ok(Target {
            resource,
            bucket,
            object,
            params,
        })
    }

    fn authenticate(&self, request: &HttpRequest, target: &Target) -> Result<(), HttpResponse> {
        let subs = target.sub_resources();

        let (access_key, signature, time) = if let Some(signature) = target.get(SIGNATURE_PARAM) {
            let expires: i64 = target
                .get(EXPIRES_PARAM)
                .and_then(|e| e.parse().ok())
                .ok_or_else(|| error(StatusCode::BAD_REQUEST, "missing Expires"))?;
            if expires < chrono::Utc::now().timestamp_millis() {
                return Err(error(StatusCode::FORBIDDEN, "Request has expired"));
            }
            (
                target.get(ACCESS_KEY_ID_PARAM).unwrap_or("").to_string(),
                signature.to_string(),
                SigningTime::Expires(expires),
            )
        } else {
            let header = request
                .headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| error(StatusCode::FORBIDDEN, "missing Authorization"))?;
            let credential = header
                .strip_prefix("Galaxy-V2 ")
                .ok_or_else(|| error(StatusCode::FORBIDDEN, "unknown auth scheme"))?;
            let (access_key, signature) = credential
                .split_once(':')
                .ok_or_else(|| error(StatusCode::FORBIDDEN, "malformed Authorization"))?;
            (
                access_key.to_string(),
                signature.to_string(),
                SigningTime::from_headers(&request.headers),
            )
        };

        if access_key != ACCESS_KEY {
            return Err(error(StatusCode::FORBIDDEN, "unknown access key"));
        }
        let expected = self.signer.sign(
            &request.method,
            &target.resource,
            &subs,
            &request.headers,
            time,
        );
        if signature != expected {
            return Err(error(StatusCode::FORBIDDEN, "SignatureDoesNotMatch"));
        }
        Ok(())
    }

    fn handle(&self, request: HttpRequest) -> HttpResponse {
        let target = match Self::parse(&request.url) {
            Ok(target) => target,
            Err(response) => return response,
        };
        if let Err(response) = self.authenticate(&request, &target) {
            return response;
        }

        let mut state = self.state.lock().unwrap();
        state.log.push((request.method.clone(), request.url.clone()));

        match (&target.bucket, &target.object) {
            (None, _) if request.method == Method::GET => list_buckets(&state),
            (None, _) => error(StatusCode::METHOD_NOT_ALLOWED, "unsupported"),
            (Some(bucket), None) => bucket_request(&mut state, &request, &target, bucket),
            (Some(bucket), Some(object)) => {
                if !state.buckets.contains_key(bucket) {
                    return error(StatusCode::NOT_FOUND, "NoSuchBucket");
                }
                object_request(&mut state, &request, &target, bucket, object)
            }
        }
    }
}

#[async_trait]
impl Transport for MockFds {
    async fn send(&self, request: HttpRequest) -> FdsResult<HttpResponse> {
        Ok(self.handle(request))
    }
}

/// Client signed with the mock's credentials
pub fn client(mock: &Arc<MockFds>) -> FdsClient {
    FdsClient::with_transport(
        Credentials::new(ACCESS_KEY, SECRET_KEY).unwrap(),
        Endpoint::new("http://fds.mock", false),
        mock.clone(),
    )
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn response(status: StatusCode, headers: HeaderMap, body: Bytes) -> HttpResponse {
    HttpResponse {
        status,
        headers,
        body,
    }
}

fn ok() -> HttpResponse {
    response(StatusCode::OK, HeaderMap::new(), Bytes::new())
}

fn error(status: StatusCode, message: &str) -> HttpResponse {
    response(status, HeaderMap::new(), Bytes::from(message.to_string()))
}

fn json<T: Serialize>(value: &T) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let body = serde_json::to_vec(value).unwrap();
    response(StatusCode::OK, headers, Bytes::from(body))
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

fn list_buckets(state: &State) -> HttpResponse {
    json(&BucketList {
        owner: None,
        buckets: state
            .buckets
            .keys()
            .map(|name| BucketInfo {
                name: name.clone(),
                creation_time: None,
            })
            .collect(),
    })
}

fn bucket_request(
    state: &mut State,
    request: &HttpRequest,
    target: &Target,
    bucket: &str,
) -> HttpResponse {
    let method = &request.method;

    if *method == Method::PUT && !target.has("deleteObjects") {
        if state.buckets.contains_key(bucket) {
            return error(StatusCode::CONFLICT, "BucketAlreadyExists");
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        return ok();
    }

    let Some(objects) = state.buckets.get_mut(bucket) else {
        return error(StatusCode::NOT_FOUND, "NoSuchBucket");
    };

    match *method {
        Method::HEAD => ok(),
        Method::DELETE => {
            if !objects.is_empty() {
                return error(StatusCode::CONFLICT, "BucketNotEmpty");
            }
            state.buckets.remove(bucket);
            ok()
        }
        Method::PUT => {
            let names: Vec<String> = match serde_json::from_slice(&request.body) {
                Ok(names) => names,
                Err(_) => return error(StatusCode::BAD_REQUEST, "malformed deleteObjects body"),
            };
            for name in &names {
                objects.remove(name);
            }
            json(&Vec::<String>::new())
        }
        Method::GET if target.has("uploads") => list_uploads(state, target, bucket),
        Method::GET => list_objects(objects, target, bucket),
        _ => error(StatusCode::METHOD_NOT_ALLOWED, "unsupported"),
    }
}

/// Page over sorted keys after `marker`. Every consumed key counts toward
/// `maxKeys`, including keys rolled into a common prefix; the next marker is
/// the last key consumed.
fn list_objects(
    objects: &BTreeMap<String, StoredObject>,
    target: &Target,
    bucket: &str,
) -> HttpResponse {
    let prefix = target.get("prefix").unwrap_or("");
    let delimiter = target.get("delimiter").unwrap_or("");
    let marker = target.get("marker").unwrap_or("");
    let max_keys: usize = target
        .get("maxKeys")
        .and_then(|m| m.parse().ok())
        .filter(|m| *m > 0)
        .unwrap_or(1000);

    let mut summaries = Vec::new();
    let mut common_prefixes: Vec<String> = Vec::new();
    let mut consumed = 0;
    let mut last_key = None;
    let mut truncated = false;

    for (key, object) in objects
        .iter()
        .filter(|(k, _)| k.as_str() > marker && k.starts_with(prefix))
    {
        if consumed == max_keys {
            truncated = true;
            break;
        }
        consumed += 1;
        last_key = Some(key.clone());

        let rest = &key[prefix.len()..];
        match (!delimiter.is_empty()).then(|| rest.find(delimiter)).flatten() {
            Some(idx) => {
                let rolled = format!("{}{}", prefix, &rest[..idx + delimiter.len()]);
                if !common_prefixes.contains(&rolled) {
                    common_prefixes.push(rolled);
                }
            }
            None => summaries.push(ObjectSummary {
                object_name: key.clone(),
                etag: Some(md5_hex(&object.data)),
                size: object.data.len() as u64,
                owner: None,
                upload_time: None,
            }),
        }
    }

    json(&ObjectListing {
        bucket_name: bucket.to_string(),
        prefix: prefix.to_string(),
        delimiter: delimiter.to_string(),
        marker: marker.to_string(),
        max_keys: max_keys as u32,
        truncated,
        next_marker: if truncated { last_key } else { None },
        object_summaries: summaries,
        common_prefixes,
    })
}

fn list_uploads(state: &State, target: &Target, bucket: &str) -> HttpResponse {
    let prefix = target.get("prefix").unwrap_or("");
    let marker = target.get("marker").unwrap_or("");
    let max_keys: usize = target
        .get("maxKeys")
        .and_then(|m| m.parse().ok())
        .filter(|m| *m > 0)
        .unwrap_or(1000);

    let mut matching = state
        .uploads
        .iter()
        .filter(|(id, u)| u.bucket == bucket && u.object.starts_with(prefix) && id.as_str() > marker);
    let uploads: Vec<MultipartUploadInfo> = matching
        .by_ref()
        .take(max_keys)
        .map(|(id, u)| MultipartUploadInfo {
            object_name: u.object.clone(),
            upload_id: id.clone(),
            upload_time: None,
        })
        .collect();
    let truncated = matching.next().is_some();

    json(&MultipartUploadListing {
        bucket_name: bucket.to_string(),
        prefix: prefix.to_string(),
        max_keys: max_keys as u32,
        marker: marker.to_string(),
        truncated,
        next_marker: if truncated {
            uploads.last().map(|u| u.upload_id.clone())
        } else {
            None
        },
        uploads,
        common_prefixes: Vec::new(),
    })
}

fn object_request(
    state: &mut State,
    request: &HttpRequest,
    target: &Target,
    bucket: &str,
    object: &str,
) -> HttpResponse {
    let method = &request.method;

    if target.has("acl") {
        let key = (bucket.to_string(), object.to_string());
        return match *method {
            Method::GET => json(&state.acls.get(&key).cloned().unwrap_or_default()),
            Method::PUT => match serde_json::from_slice::<AccessControlList>(&request.body) {
                Ok(acl) => {
                    let merged = acl
                        .access_control_list
                        .into_iter()
                        .fold(state.acls.remove(&key).unwrap_or_default(), |acc, g| {
                            acc.grant(g)
                        });
                    state.acls.insert(key, merged);
                    ok()
                }
                Err(_) => error(StatusCode::BAD_REQUEST, "malformed acl"),
            },
            _ => error(StatusCode::METHOD_NOT_ALLOWED, "unsupported"),
        };
    }

    if target.has("uploads") && *method == Method::PUT {
        state.next_id += 1;
        let upload_id = format!("upload-{:06}", state.next_id);
        let content_type = header_string(&request.headers, CONTENT_TYPE.as_str());
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                object: object.to_string(),
                content_type: content_type.clone(),
                parts: BTreeMap::new(),
            },
        );
        return json(&InitMultipartUploadResult {
            bucket_name: bucket.to_string(),
            object_name: object.to_string(),
            upload_id,
            upload_type: content_type,
        });
    }

    if let Some(upload_id) = target.get("uploadId") {
        return upload_request(state, request, target, upload_id.to_string());
    }

    let objects = state
        .buckets
        .get_mut(bucket)
        .expect("bucket checked by caller");

    match *method {
        Method::PUT | Method::POST => {
            if let Some(md5) = header_string(&request.headers, "content-md5") {
                if md5 != BASE64.encode(Md5::digest(&request.body)) {
                    return error(StatusCode::BAD_REQUEST, "BadDigest");
                }
            }
            let name = if *method == Method::POST {
                state.next_id += 1;
                format!("post-{:06}", state.next_id)
            } else {
                object.to_string()
            };
            let metadata = request
                .headers
                .iter()
                .filter(|(k, _)| k.as_str().starts_with(XIAOMI_META_PREFIX))
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect();
            let objects = state
                .buckets
                .get_mut(bucket)
                .expect("bucket checked by caller");
            objects.insert(
                name.clone(),
                StoredObject {
                    data: request.body.clone(),
                    content_type: header_string(&request.headers, CONTENT_TYPE.as_str()),
                    metadata,
                },
            );
            json(&PutObjectResult {
                bucket_name: bucket.to_string(),
                object_name: name,
                ..Default::default()
            })
        }
        Method::DELETE => match objects.remove(object) {
            Some(_) => ok(),
            None => error(StatusCode::NOT_FOUND, "NoSuchKey"),
        },
        Method::GET | Method::HEAD => {
            let Some(stored) = objects.get(object) else {
                return error(StatusCode::NOT_FOUND, "NoSuchKey");
            };
            let mut headers = HeaderMap::new();
            if let Some(content_type) = &stored.content_type {
                headers.insert(CONTENT_TYPE, content_type.parse().unwrap());
            }
            for (name, value) in &stored.metadata {
                headers.insert(
                    hyper::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                    value.parse().unwrap(),
                );
            }
            if *method == Method::HEAD {
                headers.insert(CONTENT_LENGTH, stored.data.len().into());
                return response(StatusCode::OK, headers, Bytes::new());
            }
            match header_string(&request.headers, RANGE.as_str()) {
                Some(range) => match byte_range(&range, stored.data.len()) {
                    Some((start, end)) => {
                        let body = stored.data.slice(start..end);
                        headers.insert(CONTENT_LENGTH, body.len().into());
                        response(StatusCode::PARTIAL_CONTENT, headers, body)
                    }
                    None => error(StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange"),
                },
                None => {
                    headers.insert(CONTENT_LENGTH, stored.data.len().into());
                    response(StatusCode::OK, headers, stored.data.clone())
                }
            }
        }
        _ => error(StatusCode::METHOD_NOT_ALLOWED, "unsupported"),
    }
}

fn upload_request(
    state: &mut State,
    request: &HttpRequest,
    target: &Target,
    upload_id: String,
) -> HttpResponse {
    let method = &request.method;

    let Some(upload) = state.uploads.get_mut(&upload_id) else {
        return error(StatusCode::NOT_FOUND, "NoSuchUpload");
    };

    match *method {
        Method::PUT if target.has("partNumber") => {
            let Some(part_number) = target.get("partNumber").and_then(|n| n.parse::<u32>().ok())
            else {
                return error(StatusCode::BAD_REQUEST, "invalid partNumber");
            };
            let etag = md5_hex(&request.body);
            upload.parts.insert(
                part_number,
                UploadedPart {
                    etag: etag.clone(),
                    data: request.body.clone(),
                },
            );
            json(&UploadPartResult::new(
                part_number,
                etag,
                request.body.len() as u64,
            ))
        }
        Method::PUT => {
            let list: UploadPartList = match serde_json::from_slice(&request.body) {
                Ok(list) => list,
                Err(_) => return error(StatusCode::BAD_REQUEST, "malformed part list"),
            };
            let mut assembled = Vec::new();
            for part in list.parts() {
                match upload.parts.get(&part.part_number) {
                    Some(stored) if stored.etag == part.etag => {
                        assembled.extend_from_slice(&stored.data)
                    }
                    _ => return error(StatusCode::BAD_REQUEST, "InvalidPart"),
                }
            }
            let Some(upload) = state.uploads.remove(&upload_id) else {
                return error(StatusCode::NOT_FOUND, "NoSuchUpload");
            };
            let Some(objects) = state.buckets.get_mut(&upload.bucket) else {
                return error(StatusCode::NOT_FOUND, "NoSuchBucket");
            };
            objects.insert(
                upload.object.clone(),
                StoredObject {
                    data: Bytes::from(assembled),
                    content_type: upload.content_type,
                    metadata: Vec::new(),
                },
            );
            json(&PutObjectResult {
                bucket_name: upload.bucket,
                object_name: upload.object,
                ..Default::default()
            })
        }
        Method::DELETE => {
            state.uploads.remove(&upload_id);
            ok()
        }
        Method::GET => json(&ListPartsResult {
            bucket_name: upload.bucket.clone(),
            object_name: upload.object.clone(),
            upload_id: upload_id.clone(),
            upload_part_result_list: upload
                .parts
                .iter()
                .map(|(n, p)| UploadPartResult::new(*n, p.etag.clone(), p.data.len() as u64))
                .collect(),
        }),
        _ => error(StatusCode::METHOD_NOT_ALLOWED, "unsupported"),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `bytes=start-end` (inclusive) or `bytes=start-`, as a half-open range
fn byte_range(range: &str, len: usize) -> Option<(usize, usize)> {
    let bounds = range.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end = if end.is_empty() {
        len
    } else {
        end.parse::<usize>().ok()?.saturating_add(1).min(len)
    };
    (start < end).then_some((start, end))
}
