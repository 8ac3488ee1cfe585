//! Presigned URL generation
//!
//! A presigned URL carries its own authorization in the query string:
//!
//! ```text
//! <base>/<bucket>/<object>?<sub-resources>&GalaxyAccessKeyId=..&Expires=..&Signature=..
//! ```
//!
//! The expiration (epoch millis) replaces the date line of the string to sign.
//! Only whitelisted sub-resources are signed; other query parameters ride
//! along unsigned. Expiry is enforced by the server, never checked here.

use crate::fds::signer::{
    encode_path, encode_query_into, resource_path, Signer, SigningTime, SubResource,
    ACCESS_KEY_ID_PARAM, EXPIRES_PARAM, SIGNATURE_PARAM,
};
use hyper::header::HeaderMap;
use hyper::Method;

/// Builds presigned URLs against one base URL (`scheme://host[:port]`)
#[derive(Debug, Clone, Copy)]
pub struct PresignedUrlBuilder<'a> {
    signer: &'a Signer,
    base_url: &'a str,
}

impl<'a> PresignedUrlBuilder<'a> {
    pub fn new(signer: &'a Signer, base_url: &'a str) -> Self {
        Self {
            signer,
            base_url: base_url.trim_end_matches('/'),
        }
    }

    /// Build a URL valid until `expires_at_millis`.
    ///
    /// `headers` are the ones the eventual request will send (for example
    /// `content-type` on a PUT); they must match or the server rejects it.
    pub fn build_url(
        &self,
        bucket: &str,
        object: &str,
        method: &Method,
        sub_resources: &[SubResource],
        expires_at_millis: i64,
        headers: &HeaderMap,
    ) -> String {
        let resource = resource_path(Some(bucket), Some(object));
        let signature = self.signer.sign(
            method,
            &resource,
            sub_resources,
            headers,
            SigningTime::Expires(expires_at_millis),
        );

        tracing::debug!(
            method = %method,
            resource = %resource,
            expires = expires_at_millis,
            "presigned url"
        );

        let encoded = encode_path(&resource);
        let mut url = String::with_capacity(self.base_url.len() + encoded.len() + 160);
        url.push_str(self.base_url);
        url.push_str(&encoded);
        url.push('?');
        for sub in sub_resources {
            sub.encode_into(&mut url);
            url.push('&');
        }
        url.push_str(ACCESS_KEY_ID_PARAM);
        url.push('=');
        encode_query_into(&mut url, self.signer.access_key());
        url.push('&');
        url.push_str(EXPIRES_PARAM);
        url.push('=');
        url.push_str(&expires_at_millis.to_string());
        url.push('&');
        url.push_str(SIGNATURE_PARAM);
        url.push('=');
        encode_query_into(&mut url, &signature);
        url
    }
}
