//! Dumb protocol files served straight from the repository directory.

use std::path::Path;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::error::AppError;
use crate::paths::validate_path_within_base;

const ONE_YEAR_SECS: i64 = 31_536_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NoCache,
    Forever,
}

/// Format a timestamp as an HTTP date
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn apply_cache_policy(headers: &mut HeaderMap, policy: CachePolicy) {
    match policy {
        CachePolicy::NoCache => {
            headers.insert(header::EXPIRES, HeaderValue::from_static("Fri, 01 Jan 1980 00:00:00 GMT"));
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
            );
        }
        CachePolicy::Forever => {
            let now = Utc::now();
            let expires = now + Duration::seconds(ONE_YEAR_SECS);
            if let Ok(value) = HeaderValue::from_str(&http_date(now)) {
                headers.insert(header::DATE, value);
            }
            if let Ok(value) = HeaderValue::from_str(&http_date(expires)) {
                headers.insert(header::EXPIRES, value);
            }
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000"),
            );
        }
    }
}

/// Stream `file` from `repo_dir` with the given content type and caching.
pub async fn send_file(
    repo_dir: &Path,
    file: &str,
    content_type: &'static str,
    policy: CachePolicy,
) -> Result<Response, AppError> {
    let path = repo_dir.join(file);

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(AppError::not_found("Not found")),
    };

    if let Err(e) = validate_path_within_base(&path, repo_dir) {
        warn!("Refusing to serve {}: {}", path.display(), e);
        return Err(AppError::not_found("Not found"));
    }

    let handle = tokio::fs::File::open(&path).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(handle)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified() {
        let modified: DateTime<Utc> = DateTime::<Utc>::from(modified);
        if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    apply_cache_policy(headers, policy);

    Ok(response)
}
