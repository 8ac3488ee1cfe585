//! Galaxy-V2 request signer
//!
//! The string to sign is positional: every line is present even when the
//! corresponding header is absent.
//!
//! ```text
//! HTTP-Verb + "\n" +
//! Content-MD5 + "\n" +
//! Content-Type + "\n" +
//! (Date | Expires) + "\n" +
//! CanonicalizedXiaomiHeaders +
//! CanonicalizedResource
//! ```
//!
//! `Signature = Base64(HMAC-SHA1(SecretKey, StringToSign))`. Header mode sends
//! it as `Authorization: Galaxy-V2 <AccessKeyId>:<Signature>`; presigned mode
//! carries it in the query string (see [`crate::fds::presign`]).

use crate::fds::client::{FdsError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use hyper::header::{HeaderMap, CONTENT_TYPE, DATE};
use hyper::Method;
use sha1::Sha1;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

type HmacSha1 = Hmac<Sha1>;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

pub const AUTH_SCHEME: &str = "Galaxy-V2";
pub const XIAOMI_HEADER_PREFIX: &str = "x-xiaomi-";
pub const XIAOMI_META_PREFIX: &str = "x-xiaomi-meta-";
pub const XIAOMI_DATE: &str = "x-xiaomi-date";
pub const CONTENT_MD5: &str = "content-md5";

pub const ACCESS_KEY_ID_PARAM: &str = "GalaxyAccessKeyId";
pub const EXPIRES_PARAM: &str = "Expires";
pub const SIGNATURE_PARAM: &str = "Signature";

/// Query parameters that take part in the canonicalized resource.
/// Anything else on the query string is ignored by the signature.
pub const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "deleteObjects",
    "lifecycle",
    "metadata",
    "partNumber",
    "quota",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "storageAccessToken",
    "uploadId",
    "uploads",
];

/// Access key pair used by every signed operation
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    /// Build a credential pair. Empty keys cannot sign anything meaningful.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        if access_key.trim().is_empty() {
            return Err(FdsError::Authorization("access key is empty".to_string()));
        }
        if secret_key.is_empty() {
            return Err(FdsError::Authorization("secret key is empty".to_string()));
        }
        Ok(Self {
            access_key,
            secret_key,
        })
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A query parameter such as `uploads`, `uploadId=<id>` or `partNumber=<n>`.
///
/// Values are kept raw (unencoded); encoding happens when a URL is rendered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubResource {
    name: String,
    value: Option<String>,
}

impl SubResource {
    /// A valueless marker, e.g. `uploads` or `acl`
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn upload_id(upload_id: &str) -> Self {
        Self::with_value("uploadId", upload_id)
    }

    pub fn part_number(part_number: u32) -> Self {
        Self::with_value("partNumber", part_number.to_string())
    }

    /// Parse `name` or `name=value`
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((name, value)) => Self::with_value(name, value),
            None => Self::flag(raw),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Whether this parameter belongs in the canonicalized resource
    pub fn is_signed(&self) -> bool {
        SUB_RESOURCES.contains(&self.name.as_str())
    }

    /// Append `name[=value]` to a query string, percent-encoded
    pub(crate) fn encode_into(&self, buf: &mut String) {
        encode_query_into(buf, &self.name);
        if let Some(value) = &self.value {
            buf.push('=');
            encode_query_into(buf, value);
        }
    }
}

impl fmt::Display for SubResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// The fourth line of the string to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningTime {
    /// Header mode: the request date (empty when `x-xiaomi-date` carries it)
    Date(String),
    /// Presigned mode: expiration as epoch milliseconds
    Expires(i64),
}

impl SigningTime {
    /// Derive the date line for a header-mode request.
    ///
    /// When `x-xiaomi-date` is present the line stays empty; the value is
    /// already covered by the vendor header block.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if headers.contains_key(XIAOMI_DATE) {
            SigningTime::Date(String::new())
        } else {
            SigningTime::Date(joined_header(headers, DATE.as_str()))
        }
    }
}

impl fmt::Display for SigningTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningTime::Date(date) => f.write_str(date),
            SigningTime::Expires(millis) => write!(f, "{}", millis),
        }
    }
}

/// Security-relevant view of a request, borrowed from its description.
///
/// Building it and rendering it are pure; nothing is cached.
#[derive(Debug)]
pub struct CanonicalRequest<'a> {
    method: &'a Method,
    resource: &'a str,
    sub_resources: Vec<&'a SubResource>,
    headers: &'a HeaderMap,
    time: SigningTime,
}

impl<'a> CanonicalRequest<'a> {
    /// `resource` is the unencoded path, e.g. `/bucket/dir/object`.
    /// Non-whitelisted sub-resources are dropped here.
    pub fn new(
        method: &'a Method,
        resource: &'a str,
        sub_resources: &'a [SubResource],
        headers: &'a HeaderMap,
        time: SigningTime,
    ) -> Self {
        let mut signed: Vec<&SubResource> =
            sub_resources.iter().filter(|s| s.is_signed()).collect();
        signed.sort_unstable();
        signed.dedup();
        Self {
            method,
            resource,
            sub_resources: signed,
            headers,
            time,
        }
    }

    pub fn string_to_sign(&self) -> String {
        let mut out = String::with_capacity(128 + self.resource.len());
        out.push_str(self.method.as_str());
        out.push('\n');
        out.push_str(&joined_header(self.headers, CONTENT_MD5));
        out.push('\n');
        out.push_str(&joined_header(self.headers, CONTENT_TYPE.as_str()));
        out.push('\n');
        out.push_str(&self.time.to_string());
        out.push('\n');
        out.push_str(&self.canonical_xiaomi_headers());
        out.push_str(&self.canonical_resource());
        out
    }

    /// `name:value\n` for every `x-xiaomi-*` header, sorted by name.
    /// Repeated headers are comma-joined in arrival order.
    fn canonical_xiaomi_headers(&self) -> String {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, value) in self.headers {
            let name = name.as_str();
            if name.starts_with(XIAOMI_HEADER_PREFIX) {
                grouped
                    .entry(name)
                    .or_default()
                    .push(value.to_str().unwrap_or("").trim());
            }
        }

        let mut result = String::with_capacity(grouped.len() * 48);
        for (name, values) in grouped {
            result.push_str(name);
            result.push(':');
            result.push_str(&values.join(","));
            result.push('\n');
        }
        result
    }

    fn canonical_resource(&self) -> String {
        if self.sub_resources.is_empty() {
            return self.resource.to_string();
        }
        let params = self
            .sub_resources
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.resource, params)
    }
}

/// Galaxy-V2 signer bound to one credential pair.
///
/// Stateless beyond the credentials, so clones can sign concurrently.
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
}

impl Signer {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn access_key(&self) -> &str {
        self.credentials.access_key()
    }

    /// Compute the signature token for a request description
    pub fn sign(
        &self,
        method: &Method,
        resource: &str,
        sub_resources: &[SubResource],
        headers: &HeaderMap,
        time: SigningTime,
    ) -> String {
        let canonical = CanonicalRequest::new(method, resource, sub_resources, headers, time);
        self.sign_canonical(&canonical)
    }

    pub fn sign_canonical(&self, canonical: &CanonicalRequest<'_>) -> String {
        let string_to_sign = canonical.string_to_sign();
        tracing::debug!(string_to_sign = ?string_to_sign, "galaxy-v2 string to sign");
        self.sign_string(&string_to_sign)
    }

    /// Base64(HMAC-SHA1(secret, string_to_sign))
    pub fn sign_string(&self, string_to_sign: &str) -> String {
        let mut mac = HmacSha1::new_from_slice(self.credentials.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// `Galaxy-V2 <AccessKeyId>:<Signature>`
    pub fn authorization(&self, canonical: &CanonicalRequest<'_>) -> String {
        format!(
            "{} {}:{}",
            AUTH_SCHEME,
            self.credentials.access_key,
            self.sign_canonical(canonical)
        )
    }
}

/// All values of a header, comma-joined; empty when absent
fn joined_header(headers: &HeaderMap, name: &str) -> String {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .map(|v| v.to_str().unwrap_or("").trim())
        .collect();
    values.join(",")
}

/// Build the unencoded resource path, `/bucket[/object]`
pub fn resource_path(bucket: Option<&str>, object: Option<&str>) -> String {
    match (bucket, object) {
        (None, _) => "/".to_string(),
        (Some(bucket), None) => format!("/{}", bucket),
        (Some(bucket), Some(object)) => format!("/{}/{}", bucket, object),
    }
}

/// Percent-encode a path, keeping `/` (RFC 3986 unreserved + slash).
/// Returns `Cow::Borrowed` when nothing needs encoding.
pub fn encode_path(path: &str) -> Cow<'_, str> {
    let needs_encoding = path.bytes().any(|b| !is_unreserved(b) && b != b'/');
    if !needs_encoding {
        return Cow::Borrowed(path);
    }

    let mut result = String::with_capacity(path.len() + 16);
    for byte in path.bytes() {
        if is_unreserved(byte) || byte == b'/' {
            result.push(byte as char);
        } else {
            push_escaped(&mut result, byte);
        }
    }
    Cow::Owned(result)
}

/// Percent-encode a query component directly into `buf`
pub fn encode_query_into(buf: &mut String, s: &str) {
    for byte in s.bytes() {
        if is_unreserved(byte) {
            buf.push(byte as char);
        } else {
            push_escaped(buf, byte);
        }
    }
}

fn is_unreserved(byte: u8) -> bool {
    matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~')
}

fn push_escaped(buf: &mut String, byte: u8) {
    buf.push('%');
    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
}
