//! Formatter stage
//!
//! Renders the client-facing `{name, description}` pair from user
//! templates. Two syntaxes compose:
//!
//! * `{stream.PATH}` — direct value reference
//! * `{PATH::OP[TRUE||FALSE]}` — conditional snippet where
//!   `OP ∈ {exists, =value, >value, join(sep), bytes, time}`
//!
//! The TRUE/FALSE branches may themselves contain references, one level of
//! nesting deep. Formatting never mutates the underlying stream.

use crate::models::{FormatConfig, ParsedStream};
use crate::utils::{format_bytes, format_duration_secs};

/// Value a template path resolves to
#[derive(Debug, Clone, PartialEq)]
enum TemplateValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Many(Vec<String>),
    Missing,
}

impl TemplateValue {
    fn exists(&self) -> bool {
        match self {
            TemplateValue::Missing => false,
            TemplateValue::Text(s) => !s.is_empty(),
            TemplateValue::Many(items) => !items.is_empty(),
            _ => true,
        }
    }

    fn render(&self) -> String {
        match self {
            TemplateValue::Text(s) => s.clone(),
            TemplateValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            TemplateValue::Flag(b) => b.to_string(),
            TemplateValue::Many(items) => items.join(", "),
            TemplateValue::Missing => String::new(),
        }
    }
}

pub struct Formatter<'a> {
    config: &'a FormatConfig,
}

impl<'a> Formatter<'a> {
    pub fn new(config: &'a FormatConfig) -> Self {
        Self { config }
    }

    /// Render both templates for a stream
    pub fn format(&self, stream: &ParsedStream) -> (String, String) {
        (
            render_template(&self.config.name_template, stream),
            render_template(&self.config.description_template, stream),
        )
    }

    /// Render and store the results on the stream record
    pub fn apply(&self, mut streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        for stream in &mut streams {
            let (name, description) = self.format(stream);
            stream.formatted_name = Some(name);
            stream.formatted_description = Some(description);
        }
        streams
    }
}

/// Resolve a dotted path (`stream.*`, `service.*`, `addon.*`)
fn resolve_path(stream: &ParsedStream, path: &str) -> TemplateValue {
    let (root, field) = match path.split_once('.') {
        Some(parts) => parts,
        None => return TemplateValue::Missing,
    };

    let opt_text = |v: &Option<String>| {
        v.as_ref()
            .map(|s| TemplateValue::Text(s.clone()))
            .unwrap_or(TemplateValue::Missing)
    };

    match (root, field) {
        ("stream", "type") => TemplateValue::Text(stream.stream_type().to_string()),
        ("stream", "resolution") => opt_text(&stream.parsed_file.resolution),
        ("stream", "quality") => opt_text(&stream.parsed_file.quality),
        ("stream", "encode") => opt_text(&stream.parsed_file.encode),
        ("stream", "title") => opt_text(&stream.parsed_file.title),
        ("stream", "filename") => opt_text(&stream.filename),
        ("stream", "folderName") => opt_text(&stream.folder_name),
        ("stream", "indexer") => opt_text(&stream.indexer),
        ("stream", "size") => stream
            .size
            .map(|s| TemplateValue::Number(s as f64))
            .unwrap_or(TemplateValue::Missing),
        ("stream", "folderSize") => stream
            .folder_size
            .map(|s| TemplateValue::Number(s as f64))
            .unwrap_or(TemplateValue::Missing),
        ("stream", "seeders") => stream
            .torrent
            .as_ref()
            .and_then(|t| t.seeders)
            .map(|s| TemplateValue::Number(f64::from(s)))
            .unwrap_or(TemplateValue::Missing),
        ("stream", "age") => stream
            .age
            .map(|a| TemplateValue::Number(f64::from(a)))
            .unwrap_or(TemplateValue::Missing),
        ("stream", "duration") => stream
            .duration
            .map(|d| TemplateValue::Number(f64::from(d)))
            .unwrap_or(TemplateValue::Missing),
        ("stream", "year") => stream
            .parsed_file
            .year
            .map(|y| TemplateValue::Number(f64::from(y)))
            .unwrap_or(TemplateValue::Missing),
        ("stream", "languages") => TemplateValue::Many(stream.parsed_file.languages.clone()),
        ("stream", "visualTags") => TemplateValue::Many(stream.parsed_file.visual_tags.clone()),
        ("stream", "audioTags") => TemplateValue::Many(stream.parsed_file.audio_tags.clone()),
        ("stream", "audioChannels") => {
            TemplateValue::Many(stream.parsed_file.audio_channels.clone())
        }
        ("stream", "cached") => TemplateValue::Flag(stream.is_cached()),
        ("stream", "proxied") => TemplateValue::Flag(stream.proxied),
        ("stream", "library") => TemplateValue::Flag(stream.library),
        ("stream", "releaseGroup") => opt_text(&stream.parsed_file.release_group),
        ("service", "id") => stream
            .service
            .map(|s| TemplateValue::Text(s.id.to_string()))
            .unwrap_or(TemplateValue::Missing),
        ("service", "cached") => stream
            .service
            .map(|s| TemplateValue::Flag(s.cached))
            .unwrap_or(TemplateValue::Missing),
        ("addon", "id") => TemplateValue::Text(stream.provider.clone()),
        ("addon", "name") => TemplateValue::Text(stream.provider_name.clone()),
        _ => TemplateValue::Missing,
    }
}

/// Find the closing brace for the block opening at `open`, tolerating one
/// level of nested `{...}` references inside branch text
fn matching_brace(template: &str, open: usize) -> Option<usize> {
    let bytes = template.as_bytes();
    let mut depth = 0usize;
    for (offset, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply one snippet operation; `None` means the op wants branch selection
fn apply_op(value: &TemplateValue, op: &str) -> Result<String, bool> {
    if let Some(separator) = op.strip_prefix("join(").and_then(|rest| rest.strip_suffix(')')) {
        return Ok(match value {
            TemplateValue::Many(items) => items.join(separator),
            other => other.render(),
        });
    }
    match op {
        "bytes" => Ok(match value {
            TemplateValue::Number(n) => format_bytes(*n as u64),
            TemplateValue::Missing => String::new(),
            other => other.render(),
        }),
        "time" => Ok(match value {
            TemplateValue::Number(n) => format_duration_secs(*n as u64),
            TemplateValue::Missing => String::new(),
            other => other.render(),
        }),
        "exists" => Err(value.exists()),
        _ => {
            if let Some(expected) = op.strip_prefix('=') {
                let actual = value.render();
                Err(actual.eq_ignore_ascii_case(expected))
            } else if let Some(threshold) = op.strip_prefix('>') {
                let passes = match (value, threshold.parse::<f64>()) {
                    (TemplateValue::Number(n), Ok(t)) => *n > t,
                    _ => false,
                };
                Err(passes)
            } else {
                // Unknown op renders the bare value
                Ok(value.render())
            }
        }
    }
}

/// Render one template against a stream
pub fn render_template(template: &str, stream: &ParsedStream) -> String {
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0usize;

    while let Some(relative) = template[cursor..].find('{') {
        let open = cursor + relative;
        out.push_str(&template[cursor..open]);

        let Some(close) = matching_brace(template, open) else {
            // Unbalanced: emit the rest verbatim
            out.push_str(&template[open..]);
            return out;
        };
        let block = &template[open + 1..close];
        out.push_str(&render_block(block, stream));
        cursor = close + 1;
    }
    out.push_str(&template[cursor..]);
    out
}

fn render_block(block: &str, stream: &ParsedStream) -> String {
    let (path_and_op, branches) = match block.find('[') {
        Some(bracket) if block.ends_with(']') => {
            (&block[..bracket], Some(&block[bracket + 1..block.len() - 1]))
        }
        _ => (block, None),
    };

    let (path, op) = match path_and_op.split_once("::") {
        Some((path, op)) => (path, Some(op)),
        None => (path_and_op, None),
    };

    let value = resolve_path(stream, path);

    let outcome = match op {
        None => Ok(value.render()),
        Some(op) => apply_op(&value, op),
    };

    match (outcome, branches) {
        (Ok(text), _) => text,
        (Err(condition), Some(branches)) => {
            let (true_part, false_part) = split_branches(branches);
            let chosen = if condition { true_part } else { false_part };
            render_template(chosen, stream)
        }
        // Conditional op without branches renders nothing
        (Err(_), None) => String::new(),
    }
}

/// Split `TRUE||FALSE` at the first `||` outside any nested `{...}` block,
/// so branch text may itself contain snippets with their own branches
fn split_branches(branches: &str) -> (&str, &str) {
    let bytes = branches.as_bytes();
    let mut depth = 0usize;
    let mut index = 0usize;
    while index + 1 < bytes.len() {
        match bytes[index] {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'|' if depth == 0 && bytes[index + 1] == b'|' => {
                return (&branches[..index], &branches[index + 2..]);
            }
            _ => {}
        }
        index += 1;
    }
    (branches, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServiceAttribution, ServiceId, StreamType, TorrentInfo};

    fn sample_stream() -> ParsedStream {
        ParsedStream {
            id: "p1.0".into(),
            provider: "p1".into(),
            provider_name: "Torrent Search".into(),
            r#type: Some(StreamType::Debrid),
            url: Some("https://example.com/play".into()),
            size: Some(2 * 1024 * 1024 * 1024),
            filename: Some("Some.Movie.2020.1080p.mkv".into()),
            torrent: Some(TorrentInfo {
                info_hash: "h".into(),
                seeders: Some(31),
                ..Default::default()
            }),
            service: Some(ServiceAttribution {
                id: ServiceId::RealDebrid,
                cached: true,
            }),
            parsed_file: crate::models::ParsedFile {
                resolution: Some("1080p".into()),
                languages: vec!["en".into(), "fr".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn renders_references_and_snippets() {
        let stream = sample_stream();
        assert_eq!(
            render_template("{addon.name} {stream.resolution}", &stream),
            "Torrent Search 1080p"
        );
        assert_eq!(
            render_template("{stream.cached::=true[⚡||⏳]}", &stream),
            "⚡"
        );
        assert_eq!(render_template("{stream.size::bytes}", &stream), "2.00GB");
        assert_eq!(
            render_template("{stream.languages::join(/)}", &stream),
            "en/fr"
        );
    }

    #[test]
    fn exists_branches_may_nest_references() {
        let stream = sample_stream();
        assert_eq!(
            render_template(
                "{stream.seeders::exists[👤{stream.seeders}||no seeders]}",
                &stream
            ),
            "👤31"
        );

        let mut without = sample_stream();
        without.torrent = None;
        assert_eq!(
            render_template(
                "{stream.seeders::exists[👤{stream.seeders}||no seeders]}",
                &without
            ),
            "no seeders"
        );
    }

    #[test]
    fn numeric_threshold_op() {
        let stream = sample_stream();
        assert_eq!(
            render_template("{stream.seeders::>10[healthy||weak]}", &stream),
            "healthy"
        );
        assert_eq!(
            render_template("{stream.seeders::>100[healthy||weak]}", &stream),
            "weak"
        );
    }

    #[test]
    fn missing_values_render_empty() {
        let stream = sample_stream();
        assert_eq!(render_template("{stream.folderName}", &stream), "");
        assert_eq!(render_template("{unknown.path}", &stream), "");
    }

    #[test]
    fn formatting_never_mutates_the_stream() {
        let stream = sample_stream();
        let config = FormatConfig::default();
        let before = serde_json::to_string(&stream).unwrap();
        let _ = Formatter::new(&config).format(&stream);
        let after = serde_json::to_string(&stream).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn default_templates_render_something_sensible() {
        let stream = sample_stream();
        let config = FormatConfig::default();
        let (name, description) = Formatter::new(&config).format(&stream);
        assert!(name.contains("⚡"));
        assert!(name.contains("Torrent Search"));
        assert!(description.contains("Some.Movie.2020.1080p.mkv"));
        assert!(description.contains("2.00GB"));
    }
}
