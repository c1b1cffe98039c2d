//! Page description model and the page source seam.
//!
//! [`PageProps`] is what the renderer receives as `props`. A [`PageSource`]
//! turns a request path into props plus the HTTP status to answer with.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the page manifest under the content base.
pub const MANIFEST_FILE: &str = "pages.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteCategory {
    List,
    Archive,
    Detail,
    Static,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    pub kind: RouteCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_page: Option<String>,
}

impl RouteMatch {
    pub fn not_found() -> Self {
        Self {
            kind: RouteCategory::NotFound,
            slug: None,
            static_page: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    pub show_filters: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub slug: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub summary: Option<String>,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub reading_minutes: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub featured: bool,
}

/// A single post with its rendered body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(flatten)]
    pub summary: PostSummary,
    pub content_html: String,
}

/// Everything the renderer needs to produce one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProps {
    pub route: RouteMatch,
    #[serde(default)]
    pub posts: Vec<PostSummary>,
    #[serde(default)]
    pub post: Option<Post>,
    #[serde(default)]
    pub config: SiteConfig,
}

/// Props for a page plus the status it is served with.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteData {
    pub props: PageProps,
    pub status: u16,
}

impl RouteData {
    pub fn not_found(config: SiteConfig) -> Self {
        Self {
            props: PageProps {
                route: RouteMatch::not_found(),
                posts: Vec::new(),
                post: None,
                config,
            },
            status: 404,
        }
    }
}

/// Resolves request paths into page descriptions.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn resolve(&self, path: &str) -> anyhow::Result<RouteData>;
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    config: SiteConfig,
    #[serde(default)]
    pages: HashMap<String, ManifestPage>,
}

#[derive(Debug, Deserialize)]
struct ManifestPage {
    route: RouteMatch,
    #[serde(default)]
    posts: Vec<PostSummary>,
    #[serde(default)]
    post: Option<Post>,
    #[serde(default = "default_status")]
    status: u16,
}

fn default_status() -> u16 {
    200
}

/// Page source backed by a JSON manifest of pre-resolved pages.
///
/// The manifest is read on every lookup so a content rebuild is picked up
/// without restarting the server. A missing manifest means every path is
/// not found.
#[derive(Debug, Clone)]
pub struct ManifestPageSource {
    manifest_path: PathBuf,
}

impl ManifestPageSource {
    pub fn new(content_base: impl AsRef<Path>) -> Self {
        Self {
            manifest_path: content_base.as_ref().join(MANIFEST_FILE),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    async fn load(&self) -> anyhow::Result<Manifest> {
        let bytes = match tokio::fs::read(&self.manifest_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No page manifest at {}", self.manifest_path.display());
                return Ok(Manifest::default());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read {}", self.manifest_path.display())
                })
            }
        };
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", self.manifest_path.display()))
    }
}

/// Canonical manifest key for a request path: leading slash, no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[async_trait]
impl PageSource for ManifestPageSource {
    async fn resolve(&self, path: &str) -> anyhow::Result<RouteData> {
        let mut manifest = self.load().await?;
        let key = normalize_path(path);

        match manifest.pages.remove(&key) {
            Some(page) => Ok(RouteData {
                props: PageProps {
                    route: page.route,
                    posts: page.posts,
                    post: page.post,
                    config: manifest.config,
                },
                status: page.status,
            }),
            None => Ok(RouteData::not_found(manifest.config)),
        }
    }
}
