use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::models::Platform;

const YOUTUBE_PATTERNS: &[&str] = &[
    r"^https?://(www\.)?youtube\.com/watch\?v=[\w-]+",
    r"^https?://youtu\.be/[\w-]+",
];

const BILIBILI_PATTERNS: &[&str] = &[
    r"^https?://(www\.)?bilibili\.com/video/BV\w+",
    r"^https?://(www\.)?bilibili\.com/video/av\d+",
    r"^https?://b23\.tv/\w+",
];

/// Classify a URL by its shape alone; no network access.
///
/// Surrounding whitespace is ignored. Anything that does not look like a
/// Bilibili or YouTube video link yields `None`.
pub fn classify_platform(url: &str) -> Option<Platform> {
    static MATCHERS: OnceLock<Vec<(Platform, Regex)>> = OnceLock::new();

    let matchers = MATCHERS.get_or_init(|| {
        let youtube = YOUTUBE_PATTERNS.iter().map(|p| (Platform::Youtube, *p));
        let bilibili = BILIBILI_PATTERNS.iter().map(|p| (Platform::Bilibili, *p));
        youtube
            .chain(bilibili)
            .filter_map(|(platform, pattern)| Regex::new(pattern).ok().map(|re| (platform, re)))
            .collect()
    });

    let url = url.trim();
    matchers
        .iter()
        .find(|(_, re)| re.is_match(url))
        .map(|(platform, _)| *platform)
}

/// Extracts URLs from arbitrary text (e.g. a multi-line paste on the command line).
///
/// - finds `http://` and `https://` URLs regardless of separators
/// - trims trailing prose punctuation like `)` `,` `.`
/// - normalizes via [`normalize_http_url`]
/// - de-duplicates while preserving order
pub fn extract_urls(text: &str) -> Vec<String> {
    static URL_RE: OnceLock<Option<Regex>> = OnceLock::new();

    let mut out = Vec::new();
    let mut seen = HashSet::new();

    let Some(re) = URL_RE
        .get_or_init(|| Regex::new(r"https?://[^\s]+").ok())
        .as_ref()
    else {
        return out;
    };

    for m in re.find_iter(text) {
        let cleaned = trim_trailing_punct(m.as_str());
        if let Some(normalized) = normalize_http_url(cleaned) {
            if seen.insert(normalized.clone()) {
                out.push(normalized);
            }
        }
    }

    out
}

/// Normalize a presumed http(s) URL.
///
/// Only http/https are accepted. The fragment and default ports are dropped;
/// `Url` lowercases scheme and host while parsing. Path and query stay as-is,
/// so case-sensitive ids like `BV1xx411c7mD` survive.
pub fn normalize_http_url(input: &str) -> Option<String> {
    let mut url = Url::parse(input.trim()).ok()?;

    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_fragment(None);

    let default_port = matches!((url.scheme(), url.port()), ("http", Some(80)) | ("https", Some(443)));
    if default_port {
        // Only fails for cannot-be-a-base URLs, which http(s) never are.
        let _ = url.set_port(None);
    }

    Some(url.to_string())
}

/// `https://example.com/foo),` -> `https://example.com/foo`
fn trim_trailing_punct(s: &str) -> &str {
    s.trim_end_matches([')', ']', '}', '>', ',', '.', ';', ':', '!', '?', '"', '\''])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_shapes() {
        assert_eq!(
            classify_platform("https://www.youtube.com/watch?v=abc123"),
            Some(Platform::Youtube)
        );
        assert_eq!(
            classify_platform("https://youtu.be/dQw4w9WgXcQ"),
            Some(Platform::Youtube)
        );
        assert_eq!(
            classify_platform("https://bilibili.com/video/BV1xx411c7mD"),
            Some(Platform::Bilibili)
        );
        assert_eq!(
            classify_platform("https://www.bilibili.com/video/av170001"),
            Some(Platform::Bilibili)
        );
        assert_eq!(
            classify_platform("https://b23.tv/aBcD12"),
            Some(Platform::Bilibili)
        );
    }

    #[test]
    fn classify_trims_input() {
        assert_eq!(
            classify_platform("  https://youtu.be/abc \n"),
            Some(Platform::Youtube)
        );
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(classify_platform("not a url"), None);
        assert_eq!(classify_platform(""), None);
        assert_eq!(classify_platform("https://www.youtube.com/feed/trending"), None);
        assert_eq!(classify_platform("https://vimeo.com/12345"), None);
        assert_eq!(classify_platform("ftp://youtu.be/abc"), None);
    }

    #[test]
    fn extracts_multiple_urls_dedup_preserve_order() {
        let urls = extract_urls(
            "a https://youtu.be/x\nb https://b23.tv/y c https://youtu.be/x",
        );
        assert_eq!(urls, vec!["https://youtu.be/x", "https://b23.tv/y"]);
    }

    #[test]
    fn trims_trailing_punct_and_fragment() {
        let urls = extract_urls("see (https://www.youtube.com/watch?v=1#t=10), ok");
        assert_eq!(urls, vec!["https://www.youtube.com/watch?v=1"]);
    }

    #[test]
    fn removes_default_ports_and_keeps_path_case() {
        let urls = extract_urls("https://WWW.Bilibili.com:443/video/BV1xx411c7mD");
        assert_eq!(urls, vec!["https://www.bilibili.com/video/BV1xx411c7mD"]);
    }

    #[test]
    fn ignores_non_http_schemes() {
        assert_eq!(normalize_http_url("ftp://example.com/x"), None);
        assert!(extract_urls("no links here").is_empty());
    }
}
