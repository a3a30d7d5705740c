/// Local file naming for the flat media directory.
///
/// Names follow `{sanitized-stem}_{hash8}.{ext}`, where the hash is taken over
/// the URL with Discord's expiring signature parameters removed, so a re-signed
/// link to the same file maps to the same name.
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::errors::{SyncError, SyncResult};

/// Hosts whose URLs carry expiring `ex`/`is`/`hm` signatures.
const DISCORD_CDN_HOSTS: &[&str] = &["cdn.discordapp.com", "media.discordapp.net"];

/// Query parameters that change every time Discord re-signs a link.
const EXPIRING_PARAMS: &[&str] = &["ex", "is", "hm"];

const MAX_STEM_LEN: usize = 60;

static NON_SLUG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^a-z0-9-]+").unwrap()
});

static EXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]{1,8}$").unwrap()
});

/// Strip expiring signature params from Discord CDN URLs.
///
/// Other hosts, and strings that are not URLs, are returned unchanged.
pub fn normalize_discord_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let is_cdn = url
        .host_str()
        .map(|h| DISCORD_CDN_HOSTS.contains(&h))
        .unwrap_or(false);
    if !is_cdn {
        return raw.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !EXPIRING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Last path segment of a URL, percent-decoded, without query or fragment.
pub fn url_basename(raw: &str) -> String {
    let path = raw.split(|c: char| c == '?' || c == '#').next().unwrap_or(raw);
    let segment = path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("file");
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// Build `{stem}_{hash8}.{ext}` for a file that has no producer-assigned name.
pub fn derive_unique_name(original: &str, url: &str) -> String {
    let (stem, ext) = split_extension(original);
    let slug = slugify(stem);
    let digest = Sha256::digest(normalize_discord_url(url).as_bytes());
    let hex = hex::encode(digest);
    let hash8 = &hex[..8];
    match ext {
        Some(ext) => format!("{}_{}.{}", slug, hash8, ext.to_ascii_lowercase()),
        None => format!("{}_{}", slug, hash8),
    }
}

/// Fail if `name` would not land directly inside the output directory.
pub fn ensure_flat(name: &str) -> SyncResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(|c: char| c == '/' || c == '\\') {
        return Err(SyncError::Config(format!("unsafe local file name: {:?}", name)));
    }
    Ok(())
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && EXT_RE.is_match(ext) => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn slugify(stem: &str) -> String {
    let lowered = stem.to_lowercase();
    let slug = NON_SLUG_RE.replace_all(&lowered, "-");
    let slug: String = slug.trim_matches('-').chars().take(MAX_STEM_LEN).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "file".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_signature() {
        let url = "https://cdn.discordapp.com/attachments/1/2/clip.mp4?ex=65a&is=659&hm=abc123&size=4";
        assert_eq!(
            normalize_discord_url(url),
            "https://cdn.discordapp.com/attachments/1/2/clip.mp4?size=4"
        );
    }

    #[test]
    fn test_normalize_drops_empty_query() {
        let url = "https://media.discordapp.net/attachments/1/2/a.png?ex=1&is=2&hm=3";
        assert_eq!(
            normalize_discord_url(url),
            "https://media.discordapp.net/attachments/1/2/a.png"
        );
    }

    #[test]
    fn test_normalize_leaves_other_hosts() {
        let url = "https://example.com/a.png?ex=1&hm=2";
        assert_eq!(normalize_discord_url(url), url);
        assert_eq!(normalize_discord_url("not a url"), "not a url");
    }

    #[test]
    fn test_resigned_links_share_a_name() {
        let a = derive_unique_name("clip.mp4", "https://cdn.discordapp.com/x/clip.mp4?ex=1&is=2&hm=3");
        let b = derive_unique_name("clip.mp4", "https://cdn.discordapp.com/x/clip.mp4?ex=9&is=8&hm=7");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_unique_name_shape() {
        let name = derive_unique_name("Screen Recording 2025-09-06.MP4", "https://example.com/v");
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "mp4");
        let (slug, hash) = stem.rsplit_once('_').unwrap();
        assert_eq!(slug, "screen-recording-2025-09-06");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_derive_unique_name_fallback_stem() {
        let name = derive_unique_name("???.png", "https://example.com/v");
        assert!(name.starts_with("file_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn test_url_basename() {
        assert_eq!(url_basename("https://x.com/a/b/c.png?ex=1"), "c.png");
        assert_eq!(url_basename("https://x.com/a/"), "file");
        assert_eq!(url_basename("https://x.com/Screen%20Recording.mp4"), "Screen Recording.mp4");
    }

    #[test]
    fn test_derived_name_from_encoded_basename() {
        let url = "https://x.com/a%2Fb%20c.png";
        let name = derive_unique_name(&url_basename(url), url);
        assert!(name.starts_with("a-b-c_"));
        assert!(ensure_flat(&name).is_ok());
    }

    #[test]
    fn test_ensure_flat() {
        assert!(ensure_flat("clip_085b9cc1.mp4").is_ok());
        assert!(ensure_flat("..").is_err());
        assert!(ensure_flat("a/b.png").is_err());
        assert!(ensure_flat("a\\b.png").is_err());
        assert!(ensure_flat("").is_err());
    }
}
