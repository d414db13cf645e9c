//! Static file fallback.
//!
//! Consulted for `GET` and `HEAD` requests that matched no route. Paths
//! resolve under the public directory; anything that is not a plain
//! relative path is refused.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use axum::body::Body;
use axum::http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    HeaderMap, HeaderValue, Method, StatusCode,
};
use axum::response::Response;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// A file found under the public directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub path: PathBuf,
    /// Hex SHA-1 of inode, size and modification time.
    pub etag: String,
    pub content_type: String,
    pub size: u64,
}

/// Resolver and server for files under one directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

#[cfg(unix)]
fn inode(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &std::fs::Metadata) -> u64 {
    0
}

fn etag_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/").trim_matches('"') == etag
    })
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up a request path.
    pub async fn resolve(&self, url_path: &str) -> Option<StaticFile> {
        let decoded = urlencoding::decode(url_path).ok()?;
        let relative = Path::new(decoded.trim_start_matches('/'));
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return None;
        }

        let path = self.root.join(relative);
        let meta = tokio::fs::metadata(&path).await.ok()?;
        if !meta.is_file() {
            return None;
        }

        let mtime = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_secs());
        let fingerprint = format!("{}-{}-{}", inode(&meta), meta.len(), mtime);
        let etag = hex::encode(Sha1::digest(fingerprint.as_bytes()));
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();

        Some(StaticFile {
            path,
            etag,
            content_type,
            size: meta.len(),
        })
    }

    /// Answer a request for `file`. Returns the response and its body size.
    pub async fn serve(
        &self,
        file: &StaticFile,
        method: &Method,
        request_headers: &HeaderMap,
    ) -> Result<(Response, Option<usize>)> {
        let etag = HeaderValue::from_str(&format!("\"{}\"", file.etag))
            .map_err(|err| Error::Internal(err.to_string()))?;

        let fresh = request_headers
            .get(IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| etag_matches(value, &file.etag));
        if fresh {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            response.headers_mut().insert(ETAG, etag);
            return Ok((response, Some(0)));
        }

        let content_type = HeaderValue::from_str(&file.content_type)
            .map_err(|err| Error::Internal(err.to_string()))?;

        let (body, size) = if *method == Method::HEAD {
            (Body::empty(), 0)
        } else {
            let data = tokio::fs::read(&file.path).await?;
            let size = data.len();
            (Body::from(data), size)
        };

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(ETAG, etag);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(file.size));
        Ok((response, Some(size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.html"), "<p>hi</p>").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css").join("site.css"), "p{}").unwrap();
        let files = StaticFiles::new(dir.path());
        (dir, files)
    }

    #[tokio::test]
    async fn resolves_files_with_type_and_etag() {
        let (_dir, files) = public();
        let html = files.resolve("/test.html").await.unwrap();
        assert_eq!(html.content_type, "text/html");
        assert_eq!(html.size, 9);
        assert_eq!(html.etag.len(), 40);

        let css = files.resolve("/css/site.css").await.unwrap();
        assert_eq!(css.content_type, "text/css");
        assert_eq!(files.resolve("/test.html").await.unwrap().etag, html.etag);
    }

    #[tokio::test]
    async fn refuses_directories_and_traversal() {
        let (_dir, files) = public();
        assert!(files.resolve("/").await.is_none());
        assert!(files.resolve("/css").await.is_none());
        assert!(files.resolve("/missing.txt").await.is_none());
        assert!(files.resolve("/../test.html").await.is_none());
        assert!(files.resolve("/css/%2e%2e/test.html").await.is_none());
    }

    #[test]
    fn if_none_match_forms() {
        assert!(etag_matches("\"abc\"", "abc"));
        assert!(etag_matches("W/\"abc\", \"def\"", "def"));
        assert!(etag_matches("*", "abc"));
        assert!(!etag_matches("\"abd\"", "abc"));
    }

    #[tokio::test]
    async fn serves_get_head_and_not_modified() {
        let (_dir, files) = public();
        let file = files.resolve("/test.html").await.unwrap();

        let (response, size) = files.serve(&file, &Method::GET, &HeaderMap::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(size, Some(9));
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"<p>hi</p>");

        let (response, size) = files.serve(&file, &Method::HEAD, &HeaderMap::new()).await.unwrap();
        assert_eq!(size, Some(0));
        assert_eq!(response.headers()[CONTENT_LENGTH], "9");

        let mut conditional = HeaderMap::new();
        conditional.insert(
            IF_NONE_MATCH,
            HeaderValue::from_str(&format!("\"{}\"", file.etag)).unwrap(),
        );
        let (response, _) = files.serve(&file, &Method::GET, &conditional).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }
}
