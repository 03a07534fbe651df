//! File selection inside a debrid job.
//!
//! Scoring rubric: +1000 for a video extension or mime type; +500 each for
//! a season/episode match and a year match against the request; +100 for a
//! title match via normalized partial-ratio ≥ 0.8; up to +50 proportional
//! to file size; +25 for an explicitly chosen index; +25 when the chosen
//! filename appears in the job title. Ties break toward the earliest index,
//! and a winner whose episode contradicts the request is rejected.

use crate::debrid::{DebridFile, DebridJob};
use crate::errors::{DebridError, DebridErrorCode, DebridResult};
use crate::parser::parse_title;
use crate::playback::TitleMetadata;

const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".mpg", ".mpeg", ".ts",
];

fn is_video(file: &DebridFile) -> bool {
    if let Some(mime) = file.mime.as_deref()
        && mime.starts_with("video/")
    {
        return true;
    }
    let lowered = file.name.to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

/// Lowercase alphanumeric words joined by single spaces
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

fn levenshtein(a: &[u8], b: &[u8]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let distance = levenshtein(a.as_bytes(), b.as_bytes());
    let max_len = a.len().max(b.len());
    1.0 - distance as f64 / max_len as f64
}

/// Best similarity of the shorter string against any equally long window of
/// the longer one (fuzzy partial-ratio over normalized text)
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if long.contains(short.as_str()) {
        return 1.0;
    }

    let window = short.len();
    let mut best: f64 = 0.0;
    let long_bytes = long.as_bytes();
    let mut start = 0;
    while start + window <= long_bytes.len() {
        // Stay on char boundaries; normalized text is ASCII so this is
        // always true, but the guard keeps slicing safe
        if long.is_char_boundary(start) && long.is_char_boundary(start + window) {
            best = best.max(similarity(short, &long[start..start + window]));
        }
        start += 1;
    }
    best
}

/// Explicit hints the playback link carries about the intended file
#[derive(Debug, Clone, Default)]
pub struct FileHints {
    pub index: Option<u32>,
    pub filename: Option<String>,
}

fn score(
    file: &DebridFile,
    job: &DebridJob,
    metadata: &TitleMetadata,
    hints: &FileHints,
    max_size: u64,
) -> f64 {
    let mut total = 0.0;

    if is_video(file) {
        total += 1000.0;
    }

    let parsed = parse_title(&file.name);
    if let Some(parsed) = &parsed {
        if let (Some(season), Some(episode)) = (metadata.season, metadata.episode)
            && parsed.season == Some(season)
            && parsed.episode == Some(episode)
        {
            total += 500.0;
        }
        // Absolute numbering common for anime releases
        if let Some(absolute) = metadata.absolute_episode
            && parsed.season.is_none()
            && parsed.episode == Some(absolute)
        {
            total += 500.0;
        }
        if let (Some(want), Some(have)) = (metadata.year, parsed.year)
            && want == have
        {
            total += 500.0;
        }
        if let Some(title) = &parsed.title
            && metadata
                .titles
                .iter()
                .any(|t| partial_ratio(t, title) >= 0.8)
        {
            total += 100.0;
        }
    }

    if max_size > 0 {
        total += (file.size as f64 / max_size as f64) * 50.0;
    }

    if hints.index == Some(file.index) {
        total += 25.0;
    }
    if let Some(filename) = hints.filename.as_deref()
        && normalize(&job.name).contains(&normalize(filename))
    {
        total += 25.0;
    }

    total
}

/// Pick the best-matching file of a job, or reject with `NO_MATCHING_FILE`
pub fn pick_file<'a>(
    job: &'a DebridJob,
    metadata: &TitleMetadata,
    hints: &FileHints,
) -> DebridResult<&'a DebridFile> {
    if job.files.is_empty() {
        return Err(DebridError::service(
            DebridErrorCode::NoMatchingFile,
            format!("job '{}' has no files", job.name),
        ));
    }

    let max_size = job.files.iter().map(|f| f.size).max().unwrap_or(0);

    let winner = job
        .files
        .iter()
        .map(|file| (file, score(file, job, metadata, hints, max_size)))
        .max_by(|(file_a, score_a), (file_b, score_b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Ties break toward the earliest index
                .then(file_b.index.cmp(&file_a.index))
        })
        .map(|(file, _)| file)
        .expect("non-empty file list");

    // A winner whose parsed episode contradicts the requested one is a
    // wrong pick, not a best effort
    if let (Some(season), Some(episode)) = (metadata.season, metadata.episode) {
        let parsed = parse_title(&winner.name);
        if let Some(parsed) = parsed
            && parsed.episode.is_some()
            && (parsed.season.unwrap_or(season) != season || parsed.episode != Some(episode))
        {
            return Err(DebridError::service(
                DebridErrorCode::NoMatchingFile,
                format!(
                    "best candidate '{}' does not match S{season:02}E{episode:02}",
                    winner.name
                ),
            ));
        }
    }

    Ok(winner)
}
