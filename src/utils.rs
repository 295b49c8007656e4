use anyhow::anyhow;
use rand::Rng;
use reqwest::Url;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_OUTPUT_DIR: &str = "Data/web_snapshots";
pub const MAX_WIDTH: u32 = 1920;
pub const MAX_HEIGHT: u32 = 1080;
pub const UNTITLED: &str = "untitled";
// well below the 255 byte limit most file systems put on a path component
pub const MAX_FOLDER_NAME_BYTES: usize = 200;

lazy_static! {
    pub static ref OUTPUT_DIRECTORY: PathBuf = {
        match std::env::var("SNAPSHOT_OUTPUT_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    };
}

/// Host portion of `url`, the unit of rate limiting and pool partitioning.
pub fn domain_of(url: &str) -> Option<String> {
    let u = Url::parse(url.trim()).ok()?;
    u.host_str().map(|h| h.to_lowercase())
}

/// Removes characters that are illegal in file names on common platforms.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    let mut name = cleaned.trim();
    if name.len() > MAX_FOLDER_NAME_BYTES {
        let mut end = MAX_FOLDER_NAME_BYTES;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name = &name[..end];
    }
    // trailing dots and spaces are rejected on windows
    name.trim().trim_end_matches('.').trim().to_string()
}

/// Folder name for a page: its sanitized title, else the url host, else `untitled`.
pub fn folder_name(title: &str, url: &str) -> String {
    let sanitized = sanitize_title(title);
    if !sanitized.is_empty() {
        return sanitized;
    }
    match domain_of(url) {
        Some(host) => sanitize_title(&host),
        None => UNTITLED.into(),
    }
}

/// Scroll pause given in seconds on the command line.
pub fn pause_from_secs(secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        anyhow!(
            "scroll_pause_time must be a non-negative number of seconds, got {}: {}",
            secs,
            e
        )
    })
}

/// Random duration in `[min, max)`, `min` when the range is empty.
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..max.as_secs_f64()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_domain() {
        assert_eq!(
            domain_of("https://Example.com/path?q=1#frag"),
            Some("example.com".to_string())
        );
        assert_eq!(
            domain_of("http://127.0.0.1:8080/"),
            Some("127.0.0.1".to_string())
        );
        assert_eq!(domain_of("not a url"), None);
        assert_eq!(domain_of("mailto:someone@example.com"), None);
    }

    #[test]
    fn strips_illegal_filename_characters() {
        assert_eq!(sanitize_title("A/B: C*D?"), "AB CD");
        assert_eq!(sanitize_title("  \"quoted\" <title> | x "), "quoted title  x");
        assert_eq!(sanitize_title("ends with dots..."), "ends with dots");
        assert_eq!(sanitize_title("tab\there"), "tabhere");
    }

    #[test]
    fn long_titles_are_cut_on_a_char_boundary() {
        let title = "Breaking news ".repeat(25);
        let name = sanitize_title(&title);
        assert!(name.len() <= MAX_FOLDER_NAME_BYTES);
        assert!(name.starts_with("Breaking news Breaking"));
        assert!(!name.ends_with(' '));

        // 3 byte chars, the limit falls inside one
        let wide = "日".repeat(100);
        let name = sanitize_title(&wide);
        assert_eq!(name, "日".repeat(MAX_FOLDER_NAME_BYTES / 3));
        assert_eq!(folder_name(&wide, "https://site.test/"), name);
    }

    #[test]
    fn parses_scroll_pause() {
        assert_eq!(pause_from_secs(1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(pause_from_secs(0.0).unwrap(), Duration::ZERO);
        assert!(pause_from_secs(-1.0).is_err());
        assert!(pause_from_secs(f64::NAN).is_err());
        assert!(pause_from_secs(1e30).is_err());
    }

    #[test]
    fn folder_name_falls_back_to_host() {
        assert_eq!(folder_name("Home | Site", "https://site.test/"), "Home  Site");
        assert_eq!(folder_name("???", "https://site.test/a"), "site.test");
        assert_eq!(folder_name("", "no-url"), UNTITLED);
    }

    #[test]
    fn random_delay_stays_in_range() {
        let min = Duration::from_millis(500);
        let max = Duration::from_secs(3);
        for _ in 0..100 {
            let d = random_delay(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(random_delay(max, min), max);
        assert_eq!(random_delay(Duration::ZERO, Duration::ZERO), Duration::ZERO);
    }
}
