//! Release-name parsing into structured attributes.
//!
//! `parse_title` is pure and idempotent; callers memoize per exact input
//! string via [`super::ParseMemo`]. The extraction tables are ordered so
//! the first match wins within a category.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::ParsedFile;

/// File extensions that are definitely not video content
const NON_VIDEO_EXTENSIONS: &[&str] = &[
    ".srt", ".sub", ".idx", ".nfo", ".txt", ".jpg", ".jpeg", ".png", ".sfv", ".exe", ".rar",
    ".zip", ".7z", ".iso",
];

static RESOLUTION_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(2160p|4k|uhd)\b", "2160p"),
        (r"(?i)\b1440p\b", "1440p"),
        (r"(?i)\b(1080p|1080i|fhd)\b", "1080p"),
        (r"(?i)\b(720p|hd)\b", "720p"),
        (r"(?i)\b(576p|480p|sd)\b", "480p"),
    ]
    .into_iter()
    .map(|(pattern, token)| (Regex::new(pattern).expect("static regex"), token))
    .collect()
});

static QUALITY_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bremux\b", "BluRay REMUX"),
        (r"(?i)\b(blu-?ray|bdrip|brrip)\b", "BluRay"),
        (r"(?i)\bweb-?dl\b", "WEB-DL"),
        (r"(?i)\bweb-?rip\b", "WEBRip"),
        (r"(?i)\bweb\b", "WEB-DL"),
        (r"(?i)\bhdtv\b", "HDTV"),
        (r"(?i)\bdvd(rip)?\b", "DVDRip"),
        (r"(?i)\b(hd)?cam(rip)?\b", "CAM"),
        (r"(?i)\b(telesync|\bts\b|telecine)\b", "TS"),
        (r"(?i)\bscr(eener)?\b", "SCR"),
    ]
    .into_iter()
    .map(|(pattern, token)| (Regex::new(pattern).expect("static regex"), token))
    .collect()
});

static ENCODE_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(x265|h\.?265|hevc)\b", "HEVC"),
        (r"(?i)\b(x264|h\.?264|avc)\b", "AVC"),
        (r"(?i)\bav1\b", "AV1"),
        (r"(?i)\b(xvid|divx)\b", "XviD"),
    ]
    .into_iter()
    .map(|(pattern, token)| (Regex::new(pattern).expect("static regex"), token))
    .collect()
});

static VISUAL_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bhdr10\+", "HDR10+"),
        (r"(?i)\bhdr10\b", "HDR10"),
        (r"(?i)\bhdr\b", "HDR"),
        (r"(?i)\b(dolby.?vision|dovi|\bdv\b)\b", "DV"),
        (r"(?i)\b10.?bit\b", "10bit"),
        (r"(?i)\bimax\b", "IMAX"),
        (r"(?i)\b3d\b", "3D"),
    ]
    .into_iter()
    .map(|(pattern, token)| (Regex::new(pattern).expect("static regex"), token))
    .collect()
});

static AUDIO_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\batmos\b", "Atmos"),
        (r"(?i)\btrue.?hd\b", "TrueHD"),
        (r"(?i)\bdts.?hd.?ma\b", "DTS-HD MA"),
        (r"(?i)\bdts.?hd\b", "DTS-HD"),
        (r"(?i)\bdts\b", "DTS"),
        (r"(?i)\b(ddp|dd\+|e.?ac.?3)\b", "DD+"),
        (r"(?i)\b(dd|ac.?3)\b", "DD"),
        (r"(?i)\baac\b", "AAC"),
        (r"(?i)\bflac\b", "FLAC"),
        (r"(?i)\bopus\b", "OPUS"),
    ]
    .into_iter()
    .map(|(pattern, token)| (Regex::new(pattern).expect("static regex"), token))
    .collect()
});

static CHANNEL_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    // No leading word boundary: channel specs are often fused to the
    // audio codec token, as in "DDP5.1"
    [
        (r"7\.1\b", "7.1"),
        (r"5\.1\b", "5.1"),
        (r"2\.0\b", "2.0"),
    ]
    .into_iter()
    .map(|(pattern, token)| (Regex::new(pattern).expect("static regex"), token))
    .collect()
});

static LANGUAGE_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bmulti\b", "multi"),
        (r"(?i)\bdual.?audio\b", "dual"),
        (r"(?i)\b(english|eng)\b", "en"),
        (r"(?i)\b(french|vostfr|vff|vf)\b", "fr"),
        (r"(?i)\b(german|ger)\b", "de"),
        (r"(?i)\b(spanish|castellano|latino)\b", "es"),
        (r"(?i)\b(italian|ita)\b", "it"),
        (r"(?i)\b(portuguese|dublado)\b", "pt"),
        (r"(?i)\b(russian|rus)\b", "ru"),
        (r"(?i)\b(japanese|jpn|jap)\b", "ja"),
        (r"(?i)\b(korean|kor)\b", "ko"),
        (r"(?i)\bhindi\b", "hi"),
    ]
    .into_iter()
    .map(|(pattern, token)| (Regex::new(pattern).expect("static regex"), token))
    .collect()
});

static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bs(\d{1,2})\s?[\.\-]?\s?e(\d{1,3})\b").expect("static regex")
});
static SEASON_X_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{1,3})\b").expect("static regex"));
static SEASON_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:s|season[ \.]?)(\d{1,2})\b").expect("static regex")
});
static EPISODE_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:e|ep|episode[ \.]?)(\d{1,3})\b").expect("static regex")
});
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("static regex"));
static RELEASE_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-([A-Za-z0-9]+)(?:\.[a-z0-9]{2,4})?$").expect("static regex"));
static TITLE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(19\d{2}|20\d{2}|s\d{1,2}e\d{1,3}|s\d{1,2}\b|\d{1,2}x\d{1,3}|2160p|1440p|1080p|720p|576p|480p|4k)\b")
        .expect("static regex")
});

fn first_match(rules: &[(Regex, &'static str)], input: &str) -> Option<String> {
    rules
        .iter()
        .find(|(regex, _)| regex.is_match(input))
        .map(|(_, token)| token.to_string())
}

fn all_matches(rules: &[(Regex, &'static str)], input: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (regex, token) in rules {
        if regex.is_match(input) && !out.iter().any(|t| t == token) {
            out.push(token.to_string());
        }
    }
    out
}

/// Extract the human title: everything before the first year/season/
/// resolution boundary, with separators normalized to spaces.
fn extract_title(input: &str) -> Option<String> {
    let head = match TITLE_BOUNDARY.find(input) {
        Some(boundary) if boundary.start() > 0 => &input[..boundary.start()],
        Some(_) => return None,
        None => input,
    };
    let cleaned: String = head
        .replace(['.', '_'], " ")
        .replace(['[', ']', '(', ')'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let trimmed = cleaned.trim_matches(['-', ' ']).to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Parse a release name / filename into structured attributes.
///
/// Returns `None` when the input is empty or names a non-video artifact.
pub fn parse_title(input: &str) -> Option<ParsedFile> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_ascii_lowercase();
    if NON_VIDEO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
        return None;
    }

    let (mut season, mut episode) = (None, None);
    if let Some(caps) = SEASON_EPISODE.captures(trimmed) {
        season = caps[1].parse().ok();
        episode = caps[2].parse().ok();
    } else if let Some(caps) = SEASON_X_EPISODE.captures(trimmed) {
        season = caps[1].parse().ok();
        episode = caps[2].parse().ok();
    } else {
        if let Some(caps) = SEASON_ONLY.captures(trimmed) {
            season = caps[1].parse().ok();
        }
        if let Some(caps) = EPISODE_ONLY.captures(trimmed) {
            episode = caps[1].parse().ok();
        }
    }

    let year = YEAR
        .captures(trimmed)
        .and_then(|caps| caps[1].parse::<u16>().ok());

    let release_group = RELEASE_GROUP
        .captures(trimmed)
        .map(|caps| caps[1].to_string())
        // Resolution-like or codec-like trailers are not group names
        .filter(|g| {
            !RESOLUTION_RULES.iter().any(|(r, _)| r.is_match(g))
                && !ENCODE_RULES.iter().any(|(r, _)| r.is_match(g))
        });

    Some(ParsedFile {
        resolution: first_match(&RESOLUTION_RULES, trimmed),
        quality: first_match(&QUALITY_RULES, trimmed),
        encode: first_match(&ENCODE_RULES, trimmed),
        visual_tags: all_matches(&VISUAL_RULES, trimmed),
        audio_tags: all_matches(&AUDIO_RULES, trimmed),
        audio_channels: all_matches(&CHANNEL_RULES, trimmed),
        languages: all_matches(&LANGUAGE_RULES, trimmed),
        title: extract_title(trimmed),
        year,
        season,
        episode,
        release_group,
    })
}
