use anyhow::{Context, Result};
use futures::TryStreamExt;
use hyper::header::HeaderMap;
use hyper::Method;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::fds::{FdsClient, MultipartConfig, SubResource};

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}

/// Parse an HTTP method name, case-insensitively
pub fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))
}

/// List command: every page, common prefixes first within each page
pub async fn cmd_ls(
    client: &FdsClient,
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    max_keys: u32,
) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::with_capacity(64 * 1024, stdout.lock());
    let mut total = 0usize;

    let mut pages = Box::pin(client.listing().pages(bucket, prefix, delimiter, max_keys));
    while let Some(page) = pages.try_next().await? {
        for common_prefix in &page.common_prefixes {
            writeln!(out, "{:>12}  {}", "PRE", common_prefix)?;
        }
        for object in &page.object_summaries {
            writeln!(out, "{:>12}  {}", format_bytes(object.size), object.object_name)?;
        }
        total += page.common_prefixes.len() + page.object_summaries.len();
    }
    out.flush()?;

    tracing::debug!(bucket = %bucket, prefix = %prefix, total, "listing finished");
    Ok(())
}

/// Upload a file; multipart at or above the configured threshold
pub async fn cmd_put(
    client: &FdsClient,
    bucket: &str,
    file: &Path,
    key: Option<&str>,
    content_type: Option<&str>,
    config: &MultipartConfig,
) -> Result<()> {
    let key = match key {
        Some(key) => key.to_string(),
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive an object key from {:?}", file))?,
    };

    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?
        .len();

    client
        .multipart()
        .upload_file(bucket, &key, file, content_type, config)
        .await
        .with_context(|| format!("Failed to upload {:?}", file))?;

    println!("Uploaded {} -> fds://{}/{} ({})", file.display(), bucket, key, format_bytes(size));
    Ok(())
}

/// Download an object to a file, or to stdout when `output` is `-`
pub async fn cmd_get(client: &FdsClient, bucket: &str, key: &str, output: Option<&Path>) -> Result<()> {
    let object = client.get_object(bucket, key).await?;

    match output {
        Some(path) if path == Path::new("-") => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&object.content)?;
            stdout.flush()?;
        }
        Some(path) => {
            tokio::fs::write(path, &object.content)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("Downloaded fds://{}/{} -> {}", bucket, key, path.display());
        }
        None => {
            let name = key.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or(key);
            tokio::fs::write(name, &object.content)
                .await
                .with_context(|| format!("Failed to write {}", name))?;
            println!("Downloaded fds://{}/{} -> {}", bucket, key, name);
        }
    }
    Ok(())
}

/// Remove one object, or everything under `key` when `recursive`
pub async fn cmd_rm(client: &FdsClient, bucket: &str, key: &str, recursive: bool) -> Result<()> {
    if recursive {
        let deleted = client.delete_objects_with_prefix(bucket, key).await?;
        println!("Deleted {} objects under fds://{}/{}", deleted, bucket, key);
    } else {
        client.delete_object(bucket, key).await?;
        println!("Deleted fds://{}/{}", bucket, key);
    }
    Ok(())
}

/// Print a presigned URL
pub fn cmd_presign(
    client: &FdsClient,
    bucket: &str,
    key: &str,
    method: &str,
    expires_secs: u64,
    sub_resources: &[String],
) -> Result<()> {
    let method = parse_method(method)?;
    let sub_resources: Vec<SubResource> = sub_resources.iter().map(|s| SubResource::parse(s)).collect();
    let expires_in = i64::try_from(Duration::from_secs(expires_secs).as_millis())
        .context("Expiration is too far in the future")?;
    let expires_at = chrono::Utc::now()
        .timestamp_millis()
        .checked_add(expires_in)
        .context("Expiration is too far in the future")?;

    let url = client.presigned_url(bucket, key, &method, &sub_resources, expires_at, &HeaderMap::new());
    println!("{}", url);
    Ok(())
}

/// Make bucket command
pub async fn cmd_mb(client: &FdsClient, bucket: &str) -> Result<()> {
    client.create_bucket(bucket).await?;
    println!("Bucket created: fds://{}", bucket);
    Ok(())
}

/// Remove bucket command; `force` empties it first
pub async fn cmd_rb(client: &FdsClient, bucket: &str, force: bool) -> Result<()> {
    if force {
        println!("Force delete enabled - removing all objects from bucket...");
        let deleted = client.delete_objects_with_prefix(bucket, "").await?;
        if deleted > 0 {
            println!("Deleted {} objects from bucket", deleted);
        }
    }

    client.delete_bucket(bucket).await?;
    println!("Bucket deleted: fds://{}", bucket);
    Ok(())
}

/// List in-progress multipart uploads
pub async fn cmd_uploads(client: &FdsClient, bucket: &str, prefix: &str) -> Result<()> {
    let multipart = client.multipart();
    let mut page = multipart.list_uploads(bucket, prefix, "", 0).await?;
    loop {
        for upload in &page.uploads {
            println!("{}  {}", upload.upload_id, upload.object_name);
        }
        if !page.truncated {
            break;
        }
        page = multipart.next_uploads_batch(&page).await?;
    }
    Ok(())
}
