//! Linked asset extraction and download.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::fs_utils::{file_has_contents, sanitize_filename, suffixed_name, write_new_file};
use crate::session::SessionClient;

/// Tag/attribute pairs that can reference a downloadable asset.
const ASSET_SOURCES: &[(&str, &str)] = &[
    ("a[href]", "href"),
    ("img[src]", "src"),
    ("embed[src]", "src"),
    ("iframe[src]", "src"),
];

/// One downloaded asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub source_url: String,
    pub filename: String,
    pub path: PathBuf,
    pub size: usize,
}

/// Absolute URLs of assets referenced by `html` whose path ends with one of `extensions`.
///
/// Relative references resolve against `base`. Order follows the document,
/// duplicates are dropped.
#[must_use]
pub fn extract_asset_links(html: &str, base: &Url, extensions: &[String]) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for (css, attr) in ASSET_SOURCES {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(raw) = element.value().attr(attr).map(str::trim) else {
                continue;
            };
            // Skip empty hrefs, anchors, and script pseudo-links
            if raw.is_empty()
                || raw.starts_with('#')
                || raw.starts_with("javascript:")
                || raw.starts_with("mailto:")
                || raw.starts_with("data:")
            {
                continue;
            }
            let Ok(url) = base.join(raw) else {
                debug!(href = %raw, "Skipping unresolvable asset reference");
                continue;
            };
            if !matches!(url.scheme(), "http" | "https") || !has_extension(&url, extensions) {
                continue;
            }
            if seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    }

    links
}

fn has_extension(url: &Url, extensions: &[String]) -> bool {
    let path = url.path().to_lowercase();
    extensions
        .iter()
        .any(|ext| path.ends_with(&format!(".{}", ext.to_lowercase())))
}

/// Local file name for an asset URL: last path segment, decoded and sanitized.
#[must_use]
pub fn asset_filename(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    let decoded = urlencoding::decode(segment).map_or_else(
        |_| String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned(),
        std::borrow::Cow::into_owned,
    );
    sanitize_filename(&decoded)
}

/// Downloads assets referenced by a snapshot into the run's asset directory.
#[derive(Debug, Clone)]
pub struct AssetCollector {
    dir: PathBuf,
    extensions: Vec<String>,
    timeout: Duration,
}

impl AssetCollector {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            extensions,
            timeout,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fetch every asset referenced by `html` through the session.
    ///
    /// Failures are logged per asset and never abort the cycle. A file
    /// already on disk with identical bytes is not written again; a
    /// different file of the same name gets a numeric suffix.
    pub async fn collect<S>(&self, session: &mut S, html: &str, page_url: &Url) -> Vec<AssetRecord>
    where
        S: SessionClient + ?Sized,
    {
        let links = extract_asset_links(html, page_url, &self.extensions);
        if links.is_empty() {
            return Vec::new();
        }
        info!(count = links.len(), "Downloading linked assets");

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), "Cannot create asset directory: {e}");
            return Vec::new();
        }

        let mut used_this_cycle = HashSet::new();
        let mut records = Vec::new();

        for url in links {
            match session.request_get(url.as_str(), self.timeout).await {
                Ok(response) if response.is_success() => {
                    let base_name = asset_filename(&url);
                    if let Some(record) = self
                        .store(&url, &base_name, &response.body, &mut used_this_cycle)
                        .await
                    {
                        records.push(record);
                    }
                }
                Ok(response) => {
                    warn!(url = %url, status = response.status, "Asset request returned an error status");
                }
                Err(e) => {
                    warn!(url = %url, "Asset download failed: {e}");
                }
            }
        }

        records
    }

    async fn store(
        &self,
        url: &Url,
        base_name: &str,
        body: &[u8],
        used_this_cycle: &mut HashSet<String>,
    ) -> Option<AssetRecord> {
        let mut taken = used_this_cycle.clone();
        loop {
            let filename = suffixed_name(base_name, &taken);
            let path = self.dir.join(&filename);

            if file_has_contents(&path, body).await {
                debug!(file = %filename, "Asset unchanged since an earlier cycle");
                used_this_cycle.insert(filename);
                return None;
            }

            match write_new_file(&path, body).await {
                Ok(()) => {
                    info!(file = %filename, size = body.len(), "Asset saved");
                    used_this_cycle.insert(filename.clone());
                    return Some(AssetRecord {
                        source_url: url.to_string(),
                        filename,
                        path,
                        size: body.len(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    taken.insert(filename);
                }
                Err(e) => {
                    warn!(file = %filename, "Failed to write asset: {e}");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        ["pdf", "jpg", "png"].iter().map(|e| (*e).to_string()).collect()
    }

    fn base() -> Url {
        Url::parse("https://myrequests.pis.gr/Applications.aspx").unwrap()
    }

    #[test]
    fn test_extracts_anchor_image_embed_iframe() {
        let html = r#"
            <a href="/Files/decision.pdf">Decision</a>
            <img src="images/stamp.PNG">
            <embed src="https://cdn.example.com/doc.pdf?v=2">
            <iframe src="viewer/scan.jpg"></iframe>
            <a href="/Applications.aspx?page=2">Next</a>
        "#;

        let links: Vec<String> = extract_asset_links(html, &base(), &exts())
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            links,
            vec![
                "https://myrequests.pis.gr/Files/decision.pdf",
                "https://myrequests.pis.gr/images/stamp.PNG",
                "https://cdn.example.com/doc.pdf?v=2",
                "https://myrequests.pis.gr/viewer/scan.jpg",
            ]
        );
    }

    #[test]
    fn test_skips_pseudo_links_and_duplicates() {
        let html = r##"
            <a href="#top.pdf">Anchor</a>
            <a href="javascript:open('x.pdf')">JS</a>
            <a href="mailto:office@pis.gr?subject=a.pdf">Mail</a>
            <a href="files/a.pdf">A</a>
            <a href="/files/a.pdf">A again</a>
        "##;

        let links = extract_asset_links(html, &base(), &exts());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://myrequests.pis.gr/files/a.pdf");
    }

    #[test]
    fn test_extension_must_end_the_path() {
        let html = r#"<a href="/pdf/viewer.aspx">viewer</a><a href="/file.pdf.aspx">x</a>"#;
        assert!(extract_asset_links(html, &base(), &exts()).is_empty());
    }

    #[test]
    fn test_asset_filename_decodes_and_sanitizes() {
        let url = Url::parse("https://myrequests.pis.gr/Files/%CE%91%CE%AF%CF%84%CE%B7%CF%83%CE%B7%20final.pdf").unwrap();
        assert_eq!(asset_filename(&url), "Αίτηση_final.pdf");
    }

    #[test]
    fn test_asset_filename_keeps_query_like_characters() {
        let url = Url::parse("https://myrequests.pis.gr/Files/report&annex.pdf").unwrap();
        assert_eq!(asset_filename(&url), "report_annex.pdf");
        let url = Url::parse("https://myrequests.pis.gr/Files/a=b&c=d.pdf").unwrap();
        assert_eq!(asset_filename(&url), "a_b_c_d.pdf");
        let url = Url::parse("https://myrequests.pis.gr/Files/x%26y%3Dz.pdf").unwrap();
        assert_eq!(asset_filename(&url), "x_y_z.pdf");
    }

    #[test]
    fn test_asset_filename_invalid_utf8_is_lossy() {
        let url = Url::parse("https://myrequests.pis.gr/Files/bad%FFname.pdf").unwrap();
        assert!(asset_filename(&url).ends_with(".pdf"));
    }

    #[test]
    fn test_asset_filename_plus_is_not_a_space() {
        let url = Url::parse("https://example.com/a+b.pdf").unwrap();
        assert_eq!(asset_filename(&url), "a_b.pdf");
    }
}
