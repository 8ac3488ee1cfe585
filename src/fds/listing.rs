//! Prefix/delimiter listing with marker continuation.
//!
//! The server's `nextMarker` is treated as opaque: [`ListingPaginator::next_batch`]
//! sends back exactly what the previous page carried and never derives a
//! marker from the keys it has seen.

use crate::fds::client::{FdsClient, FdsError, FdsRequest, Result};
use crate::fds::types::ObjectListing;
use futures::stream::{self, Stream};
use hyper::Method;

#[derive(Clone, Copy)]
pub struct ListingPaginator<'a> {
    client: &'a FdsClient,
}

enum Cursor {
    Start {
        bucket: String,
        prefix: String,
        delimiter: String,
        max_keys: u32,
    },
    Next(ObjectListing),
    Done,
}

impl<'a> ListingPaginator<'a> {
    pub fn new(client: &'a FdsClient) -> Self {
        Self { client }
    }

    /// First page of `bucket` under `prefix`. Keys with `delimiter` after the
    /// prefix are rolled up into common prefixes by the server.
    /// `max_keys = 0` leaves the page size to the server.
    pub async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
    ) -> Result<ObjectListing> {
        self.list_from(bucket, prefix, delimiter, max_keys, None)
            .await
    }

    /// Page following `previous`. Calling this on a page that is not
    /// truncated is a sequencing error, not an empty page.
    pub async fn next_batch(&self, previous: &ObjectListing) -> Result<ObjectListing> {
        if !previous.truncated {
            return Err(FdsError::Sequencing(format!(
                "listing of {} under '{}' is not truncated; there is no next batch",
                previous.bucket_name, previous.prefix
            )));
        }
        let marker = previous.next_marker.as_deref().ok_or_else(|| {
            FdsError::InvalidResponse("truncated listing has no next marker".to_string())
        })?;

        self.list_from(
            &previous.bucket_name,
            &previous.prefix,
            &previous.delimiter,
            previous.max_keys,
            Some(marker),
        )
        .await
    }

    /// Every page in order, ending after the first non-truncated one
    pub fn pages(
        self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
    ) -> impl Stream<Item = Result<ObjectListing>> + 'a {
        let start = Cursor::Start {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            delimiter: delimiter.to_string(),
            max_keys,
        };
        stream::try_unfold(start, move |cursor| async move {
            let page = match cursor {
                Cursor::Start {
                    bucket,
                    prefix,
                    delimiter,
                    max_keys,
                } => self.list(&bucket, &prefix, &delimiter, max_keys).await?,
                Cursor::Next(previous) => self.next_batch(&previous).await?,
                Cursor::Done => return Ok(None),
            };
            let next = if page.truncated {
                Cursor::Next(page.clone())
            } else {
                Cursor::Done
            };
            Ok::<_, FdsError>(Some((page, next)))
        })
    }

    async fn list_from(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        marker: Option<&str>,
    ) -> Result<ObjectListing> {
        let max_keys_param = max_keys.to_string();
        let request = FdsRequest::new(Method::GET)
            .bucket(bucket)
            .param_if("prefix", Some(prefix))
            .param_if("delimiter", Some(delimiter))
            .param_if("maxKeys", (max_keys > 0).then_some(max_keys_param.as_str()))
            .param_if("marker", marker);

        let mut page: ObjectListing = self.client.execute_json(request).await?;

        // Continuation needs the query echoed back; fill what the server left out.
        if page.bucket_name.is_empty() {
            page.bucket_name = bucket.to_string();
        }
        if page.prefix.is_empty() {
            page.prefix = prefix.to_string();
        }
        if page.delimiter.is_empty() {
            page.delimiter = delimiter.to_string();
        }
        if page.max_keys == 0 {
            page.max_keys = max_keys;
        }

        tracing::debug!(
            bucket = %bucket,
            prefix = %prefix,
            marker = marker.unwrap_or(""),
            objects = page.object_summaries.len(),
            common_prefixes = page.common_prefixes.len(),
            truncated = page.truncated,
            "listing page"
        );
        Ok(page)
    }
}
