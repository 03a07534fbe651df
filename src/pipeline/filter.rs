//! Filter stage
//!
//! The filter is the AND of independent category predicates:
//! excluded / included / required lists per categorical attribute, regex and
//! keyword rules, stream-expression selectors, a scoped seeders range and
//! scoped size ranges. `preferred` lists never eliminate; they only mark
//! streams for the sorter.

use regex::Regex;

use crate::config::LimitsConfig;
use crate::errors::{AppError, AppResult, ExpressionError};
use crate::expression::{StreamExpression, validate_selector};
use crate::models::{
    AttributeLists, FilterConfig, MediaType, ParsedStream, SeederScope, StreamType, UserConfig,
};

/// One compiled regex rule with its configured index
struct CompiledRule {
    regex: Regex,
}

/// A validated stream-expression rule
struct CompiledExpression {
    expression: StreamExpression,
}

pub struct FilterEngine {
    config: FilterConfig,
    media_type: MediaType,

    excluded_regexes: Vec<CompiledRule>,
    required_regexes: Vec<CompiledRule>,
    preferred_regexes: Vec<CompiledRule>,

    excluded_expressions: Vec<CompiledExpression>,
    required_expressions: Vec<CompiledExpression>,
    preferred_expressions: Vec<CompiledExpression>,
}

impl FilterEngine {
    /// Validate and compile the user's filter configuration.
    ///
    /// Regex compilation failures and allow-list violations fail with
    /// `InvalidRegex`; expression budget violations with `TooMany`.
    pub fn new(
        user: &UserConfig,
        media_type: MediaType,
        limits: &LimitsConfig,
    ) -> AppResult<Self> {
        let config = user.filters.clone();

        let expression_count = config.excluded_expressions.len()
            + config.required_expressions.len()
            + config.preferred_expressions.len();
        if expression_count > limits.max_stream_expression_filters {
            return Err(ExpressionError::TooMany {
                kind: "stream expression",
                count: expression_count,
                limit: limits.max_stream_expression_filters,
            }
            .into());
        }

        let keyword_count = config.excluded_keywords.len()
            + config.required_keywords.len()
            + config.preferred_keywords.len();
        if keyword_count > limits.max_keyword_filters {
            return Err(AppError::invalid_config(
                "filters.keywords",
                format!(
                    "{keyword_count} keywords exceed the limit of {}",
                    limits.max_keyword_filters
                ),
            ));
        }

        let compile = |patterns: &[crate::models::RegexRule]| -> AppResult<Vec<CompiledRule>> {
            patterns
                .iter()
                .map(|rule| {
                    if !user.allow_free_regex
                        && !limits.regex_allowlist.iter().any(|p| p == &rule.pattern)
                    {
                        return Err(AppError::invalid_regex(
                            rule.pattern.clone(),
                            "pattern is not on the allow-list",
                        ));
                    }
                    let regex = Regex::new(&rule.pattern).map_err(|e| {
                        AppError::invalid_regex(rule.pattern.clone(), e.to_string())
                    })?;
                    Ok(CompiledRule { regex })
                })
                .collect()
        };

        let parse_expressions =
            |rules: &[crate::models::ExpressionRule]| -> AppResult<Vec<CompiledExpression>> {
                rules
                    .iter()
                    .map(|rule| {
                        let expression = validate_selector(&rule.expression)?;
                        Ok(CompiledExpression { expression })
                    })
                    .collect()
            };

        Ok(Self {
            excluded_regexes: compile(&config.excluded_regexes)?,
            required_regexes: compile(&config.required_regexes)?,
            preferred_regexes: compile(&config.preferred_regexes)?,
            excluded_expressions: parse_expressions(&config.excluded_expressions)?,
            required_expressions: parse_expressions(&config.required_expressions)?,
            preferred_expressions: parse_expressions(&config.preferred_expressions)?,
            config,
            media_type,
        })
    }

    /// Run the filter over the merged candidate collection.
    ///
    /// Survivors come back in input order with their preferred-rule match
    /// indices populated for the sorter.
    pub fn apply(&self, streams: Vec<ParsedStream>) -> AppResult<Vec<ParsedStream>> {
        // Selector sets are computed over the full input collection so the
        // bound `streams` variable means the same thing for every rule
        let excluded_sets = self.selector_sets(&self.excluded_expressions, &streams)?;
        let required_sets = self.selector_sets(&self.required_expressions, &streams)?;
        let preferred_sets = self.selector_sets(&self.preferred_expressions, &streams)?;

        let mut survivors = Vec::with_capacity(streams.len());
        for (index, mut stream) in streams.into_iter().enumerate() {
            // Inline errors and statistics always pass through
            if matches!(
                stream.stream_type(),
                StreamType::Error | StreamType::Statistic
            ) {
                survivors.push(stream);
                continue;
            }

            if !self.passes_categories(&stream)
                || !self.passes_regexes(&stream)
                || !self.passes_keywords(&stream)
                || !self.passes_seeders(&stream)
                || !self.passes_size(&stream)
            {
                continue;
            }

            if excluded_sets.iter().any(|set| set.contains(&index)) {
                continue;
            }
            if !required_sets.iter().all(|set| set.contains(&index)) {
                continue;
            }

            stream.regex_matched = self
                .preferred_regexes
                .iter()
                .position(|rule| rule.regex.is_match(&Self::haystack(&stream)));
            stream.keyword_matched = self
                .config
                .preferred_keywords
                .iter()
                .position(|kw| Self::keyword_hit(&stream, kw));
            stream.stream_expression_matched = preferred_sets
                .iter()
                .position(|set| set.contains(&index));

            survivors.push(stream);
        }

        Ok(survivors)
    }

    fn selector_sets(
        &self,
        rules: &[CompiledExpression],
        streams: &[ParsedStream],
    ) -> AppResult<Vec<std::collections::HashSet<usize>>> {
        rules
            .iter()
            .map(|rule| {
                Ok(rule
                    .expression
                    .selector_indices(streams)?
                    .into_iter()
                    .collect())
            })
            .collect()
    }

    fn passes_categories(&self, stream: &ParsedStream) -> bool {
        let file = &stream.parsed_file;

        Self::check_lists(&self.config.resolutions, &as_slice(&file.resolution))
            && Self::check_lists(&self.config.qualities, &as_slice(&file.quality))
            && Self::check_lists(&self.config.languages, &file.languages)
            && Self::check_visual_tags(&self.config.visual_tags, &file.visual_tags)
            && Self::check_lists(&self.config.audio_tags, &file.audio_tags)
            && Self::check_lists(&self.config.audio_channels, &file.audio_channels)
            && Self::check_lists(
                &self.config.stream_types,
                &[stream.stream_type().to_string()],
            )
            && Self::check_lists(&self.config.encodes, &as_slice(&file.encode))
    }

    /// excluded: fail on intersection; included: non-empty list requires
    /// intersection; required: every listed token must be present
    fn check_lists(lists: &AttributeLists, values: &[String]) -> bool {
        let has = |token: &str| values.iter().any(|v| v.eq_ignore_ascii_case(token));

        if lists.excluded.iter().any(|t| has(t)) {
            return false;
        }
        if !lists.included.is_empty() && !lists.included.iter().any(|t| has(t)) {
            return false;
        }
        if !lists.required.iter().all(|t| has(t)) {
            return false;
        }
        true
    }

    /// Visual tags add the synthetic combos `HDR+DV`, `DV Only`, `HDR Only`
    fn check_visual_tags(lists: &AttributeLists, tags: &[String]) -> bool {
        let has_hdr = tags.iter().any(|t| t.to_ascii_uppercase().starts_with("HDR"));
        let has_dv = tags.iter().any(|t| t.eq_ignore_ascii_case("DV"));

        let matches_token = |token: &str| -> bool {
            match token.to_ascii_uppercase().as_str() {
                "HDR+DV" => has_hdr && has_dv,
                "DV ONLY" => has_dv && !has_hdr,
                "HDR ONLY" => has_hdr && !has_dv,
                _ => tags.iter().any(|t| t.eq_ignore_ascii_case(token)),
            }
        };

        if lists.excluded.iter().any(|t| matches_token(t)) {
            return false;
        }
        if !lists.included.is_empty() && !lists.included.iter().any(|t| matches_token(t)) {
            return false;
        }
        if !lists.required.iter().all(|t| matches_token(t)) {
            return false;
        }
        true
    }

    /// Searchable text for regex and keyword rules
    fn haystack(stream: &ParsedStream) -> String {
        let mut parts = Vec::new();
        if let Some(filename) = &stream.filename {
            parts.push(filename.as_str());
        }
        if let Some(folder) = &stream.folder_name {
            parts.push(folder.as_str());
        }
        if let Some(title) = &stream.parsed_file.title {
            parts.push(title.as_str());
        }
        if let Some(group) = &stream.parsed_file.release_group {
            parts.push(group.as_str());
        }
        parts.join("\n")
    }

    fn passes_regexes(&self, stream: &ParsedStream) -> bool {
        let haystack = Self::haystack(stream);
        if self
            .excluded_regexes
            .iter()
            .any(|rule| rule.regex.is_match(&haystack))
        {
            return false;
        }
        self.required_regexes
            .iter()
            .all(|rule| rule.regex.is_match(&haystack))
    }

    fn keyword_hit(stream: &ParsedStream, keyword: &str) -> bool {
        let haystack = Self::haystack(stream).to_ascii_lowercase();
        haystack.contains(&keyword.to_ascii_lowercase())
    }

    fn passes_keywords(&self, stream: &ParsedStream) -> bool {
        if self
            .config
            .excluded_keywords
            .iter()
            .any(|kw| Self::keyword_hit(stream, kw))
        {
            return false;
        }
        self.config
            .required_keywords
            .iter()
            .all(|kw| Self::keyword_hit(stream, kw))
    }

    /// The seeders range applies per scope: p2p streams by default, cached
    /// and uncached debrid streams only when their scope is listed
    fn passes_seeders(&self, stream: &ParsedStream) -> bool {
        let Some(range) = &self.config.seeders else {
            return true;
        };

        let in_scope = match stream.stream_type() {
            StreamType::P2p => {
                range.scopes.is_empty() || range.scopes.contains(&SeederScope::P2p)
            }
            StreamType::Debrid | StreamType::Usenet => {
                if stream.is_cached() {
                    range.scopes.contains(&SeederScope::Cached)
                } else {
                    range.scopes.contains(&SeederScope::Uncached)
                }
            }
            _ => false,
        };
        if !in_scope {
            return true;
        }

        let seeders = stream.torrent.as_ref().and_then(|t| t.seeders).unwrap_or(0);
        if let Some(min) = range.min
            && seeders < min
        {
            return false;
        }
        if let Some(max) = range.max
            && seeders > max
        {
            return false;
        }
        true
    }

    fn passes_size(&self, stream: &ParsedStream) -> bool {
        let Some(size) = stream.size else {
            // Unknown size is never grounds for elimination
            return true;
        };
        let range = self
            .config
            .size
            .effective(self.media_type, stream.parsed_file.resolution.as_deref());
        range.contains(size)
    }
}

fn as_slice(value: &Option<String>) -> Vec<String> {
    value.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with_resolution(id: &str, resolution: &str) -> ParsedStream {
        ParsedStream {
            id: id.to_string(),
            r#type: Some(StreamType::Http),
            url: Some("https://example.com".into()),
            parsed_file: crate::models::ParsedFile {
                resolution: Some(resolution.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn engine(user: &UserConfig) -> FilterEngine {
        FilterEngine::new(user, MediaType::Movie, &LimitsConfig::default()).unwrap()
    }

    #[test]
    fn excluded_resolution_eliminates_preferred_does_not() {
        let mut user = UserConfig::default();
        user.filters.resolutions.excluded = vec!["480p".into()];
        user.filters.resolutions.preferred = vec!["2160p".into(), "1080p".into()];

        let streams = vec![
            stream_with_resolution("a", "2160p"),
            stream_with_resolution("b", "1080p"),
            stream_with_resolution("c", "720p"),
            stream_with_resolution("d", "480p"),
        ];

        let out = engine(&user).apply(streams).unwrap();
        let ids: Vec<&str> = out.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn included_list_requires_intersection() {
        let mut user = UserConfig::default();
        user.filters.resolutions.included = vec!["1080p".into()];

        let streams = vec![
            stream_with_resolution("a", "2160p"),
            stream_with_resolution("b", "1080p"),
        ];
        let out = engine(&user).apply(streams).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "b");
    }

    #[test]
    fn visual_tag_synthetic_combos() {
        let mut user = UserConfig::default();
        user.filters.visual_tags.excluded = vec!["DV Only".into()];

        let mut dv_only = stream_with_resolution("dv", "1080p");
        dv_only.parsed_file.visual_tags = vec!["DV".into()];
        let mut dv_hdr = stream_with_resolution("both", "1080p");
        dv_hdr.parsed_file.visual_tags = vec!["DV".into(), "HDR10".into()];

        let out = engine(&user).apply(vec![dv_only, dv_hdr]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "both");
    }

    #[test]
    fn expression_rules_select_and_exclude() {
        let mut user = UserConfig::default();
        user.filters.excluded_expressions = vec![crate::models::ExpressionRule {
            expression: "size > 8gb".into(),
            name: None,
        }];

        let mut small = stream_with_resolution("small", "1080p");
        small.size = Some(4 * 1024 * 1024 * 1024);
        let mut big = stream_with_resolution("big", "1080p");
        big.size = Some(16 * 1024 * 1024 * 1024);

        let out = engine(&user).apply(vec![small, big]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "small");
    }

    #[test]
    fn regex_allowlist_gates_unprivileged_users() {
        let mut user = UserConfig::default();
        user.allow_free_regex = false;
        user.filters.excluded_regexes = vec![crate::models::RegexRule {
            pattern: "cam".into(),
            name: None,
        }];

        let result = FilterEngine::new(&user, MediaType::Movie, &LimitsConfig::default());
        assert!(matches!(result, Err(AppError::InvalidRegex { .. })));

        let limits = LimitsConfig {
            regex_allowlist: vec!["cam".into()],
            ..Default::default()
        };
        assert!(FilterEngine::new(&user, MediaType::Movie, &limits).is_ok());
    }

    #[test]
    fn invalid_regex_fails_compilation() {
        let mut user = UserConfig::default();
        user.allow_free_regex = true;
        user.filters.excluded_regexes = vec![crate::models::RegexRule {
            pattern: "(unclosed".into(),
            name: None,
        }];
        assert!(matches!(
            FilterEngine::new(&user, MediaType::Movie, &LimitsConfig::default()),
            Err(AppError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn error_streams_always_pass() {
        let mut user = UserConfig::default();
        user.filters.resolutions.included = vec!["1080p".into()];

        let error = ParsedStream {
            id: "err".into(),
            r#type: Some(StreamType::Error),
            error: Some(crate::models::StreamErrorInfo {
                title: "provider timed out".into(),
                description: None,
            }),
            ..Default::default()
        };
        let out = engine(&user).apply(vec![error]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn expression_budget_is_enforced() {
        let mut user = UserConfig::default();
        for _ in 0..3 {
            user.filters.excluded_expressions.push(crate::models::ExpressionRule {
                expression: "size > 1gb".into(),
                name: None,
            });
        }
        let limits = LimitsConfig {
            max_stream_expression_filters: 2,
            ..Default::default()
        };
        assert!(matches!(
            FilterEngine::new(&user, MediaType::Movie, &limits),
            Err(AppError::Expression(ExpressionError::TooMany { .. }))
        ));
    }
}
