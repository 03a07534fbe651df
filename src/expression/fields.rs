//! Canonical field registry for the stream expression DSL.
//!
//! Every identifier an expression may reference resolves here; keeping the
//! registry in one table lets validation produce "did you mean" suggestions
//! and keeps the evaluator free of stringly scattered lookups.

use crate::expression::evaluator::Value;
use crate::models::ParsedStream;

/// The bound variable naming the whole candidate collection
pub const STREAMS_VAR: &str = "streams";

/// Canonical field names, used for suggestion scoring
pub const KNOWN_FIELDS: &[&str] = &[
    "type",
    "resolution",
    "quality",
    "encode",
    "size",
    "folderSize",
    "seeders",
    "age",
    "cached",
    "service",
    "addon",
    "addonName",
    "indexer",
    "filename",
    "folderName",
    "title",
    "year",
    "season",
    "episode",
    "releaseGroup",
    "language",
    "languages",
    "visualTags",
    "audioTags",
    "audioChannels",
    "library",
    "proxied",
    "infoHash",
    "regexMatched",
    "keywordMatched",
];

fn opt_str(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map(|s| Value::Str(s.clone()))
        .unwrap_or(Value::Null)
}

fn opt_num<N: Into<f64> + Copy>(value: Option<N>) -> Value {
    value.map(|n| Value::Num(n.into())).unwrap_or(Value::Null)
}

/// Resolve one field of a stream. `None` means the name is unknown
/// (as opposed to known-but-absent, which yields `Value::Null`).
pub fn lookup(stream: &ParsedStream, name: &str) -> Option<Value> {
    let value = match name {
        "type" => Value::Str(stream.stream_type().to_string()),
        "resolution" => opt_str(&stream.parsed_file.resolution),
        "quality" => opt_str(&stream.parsed_file.quality),
        "encode" => opt_str(&stream.parsed_file.encode),
        "size" => opt_num(stream.size.map(|v| v as f64)),
        "folderSize" => opt_num(stream.folder_size.map(|v| v as f64)),
        "seeders" => opt_num(
            stream
                .torrent
                .as_ref()
                .and_then(|t| t.seeders)
                .map(f64::from),
        ),
        "age" => opt_num(stream.age.map(f64::from)),
        "cached" => Value::Bool(stream.is_cached()),
        "service" => stream
            .service
            .map(|s| Value::Str(s.id.to_string()))
            .unwrap_or(Value::Null),
        "addon" => Value::Str(stream.provider.clone()),
        "addonName" => Value::Str(stream.provider_name.clone()),
        "indexer" => opt_str(&stream.indexer),
        "filename" => opt_str(&stream.filename),
        "folderName" => opt_str(&stream.folder_name),
        "title" => opt_str(&stream.parsed_file.title),
        "year" => opt_num(stream.parsed_file.year.map(f64::from)),
        "season" => opt_num(stream.parsed_file.season.map(f64::from)),
        "episode" => opt_num(stream.parsed_file.episode.map(f64::from)),
        "releaseGroup" => opt_str(&stream.parsed_file.release_group),
        "language" | "languages" => Value::List(stream.parsed_file.languages.clone()),
        "visualTags" => Value::List(stream.parsed_file.visual_tags.clone()),
        "audioTags" => Value::List(stream.parsed_file.audio_tags.clone()),
        "audioChannels" => Value::List(stream.parsed_file.audio_channels.clone()),
        "library" => Value::Bool(stream.library),
        "proxied" => Value::Bool(stream.proxied),
        "infoHash" => stream
            .torrent
            .as_ref()
            .map(|t| Value::Str(t.info_hash.clone()))
            .unwrap_or(Value::Null),
        "regexMatched" => opt_num(stream.regex_matched.map(|v| v as f64)),
        "keywordMatched" => opt_num(stream.keyword_matched.map(|v| v as f64)),
        _ => return None,
    };
    Some(value)
}

/// Character-overlap similarity, good enough for typo suggestions
fn similarity(a: &str, b: &str) -> u32 {
    if a.eq_ignore_ascii_case(b) {
        return 100;
    }
    let a_low = a.to_lowercase();
    let b_low = b.to_lowercase();
    let a_chars: std::collections::HashSet<char> = a_low.chars().collect();
    let b_chars: std::collections::HashSet<char> = b_low.chars().collect();
    let common = a_chars.intersection(&b_chars).count();
    let max_len = a_low.len().max(b_low.len()).max(1);
    (common * 100) as u32 / max_len as u32
}

/// Best suggestion for an unknown field name, when one scores well enough
pub fn suggest(unknown: &str) -> Option<String> {
    let mut best: Option<(&str, u32)> = None;
    for candidate in KNOWN_FIELDS {
        let score = similarity(unknown, candidate);
        if score >= 55 {
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((candidate, score)),
            }
        }
    }
    best.map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_distinguished_from_absent_values() {
        let stream = ParsedStream::default();
        assert!(lookup(&stream, "nope").is_none());
        assert_eq!(lookup(&stream, "indexer"), Some(Value::Null));
    }

    #[test]
    fn suggestions_hit_close_typos() {
        assert_eq!(suggest("resolutoin").as_deref(), Some("resolution"));
        assert_eq!(suggest("qualty").as_deref(), Some("quality"));
        assert_eq!(suggest("zzzz"), None);
    }
}
