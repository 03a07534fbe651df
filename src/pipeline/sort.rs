//! Sort stage
//!
//! Stable multi-criterion sort. Categorical criteria score by position in
//! the user's preferred lists (unlisted sinks last when descending);
//! numeric criteria use the value itself; `addon`/`service` use the
//! configured order; matched-rule criteria use the rule index. Per-type
//! criteria replace the global list, and when `cached` leads the list the
//! collection is partitioned and each partition sorted with its own list.

use std::cmp::Ordering;

use crate::models::{
    MediaType, ParsedStream, SortCriterion, SortDirection, SortKey, UserConfig,
};

pub struct SortEngine<'a> {
    user: &'a UserConfig,
    media_type: MediaType,
}

impl<'a> SortEngine<'a> {
    pub fn new(user: &'a UserConfig, media_type: MediaType) -> Self {
        Self { user, media_type }
    }

    pub fn apply(&self, mut streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        let criteria = self.user.sort.for_media_type(self.media_type).to_vec();
        if criteria.is_empty() {
            return self.force_to_top(streams);
        }

        // Cached partition handling only when `cached` leads the criteria
        if let Some(first) = criteria.first()
            && first.criterion == SortCriterion::Cached
        {
            let direction = first.direction;
            let rest: Vec<SortKey> = criteria[1..].to_vec();
            let cached_criteria = self.user.sort.cached.clone().unwrap_or_else(|| rest.clone());
            let uncached_criteria = self.user.sort.uncached.clone().unwrap_or(rest);

            let (mut cached, mut uncached): (Vec<ParsedStream>, Vec<ParsedStream>) =
                streams.into_iter().partition(|s| s.is_cached());
            self.sort_with(&mut cached, &cached_criteria);
            self.sort_with(&mut uncached, &uncached_criteria);

            let merged = match direction {
                SortDirection::Desc => {
                    let mut merged = cached;
                    merged.extend(uncached);
                    merged
                }
                SortDirection::Asc => {
                    let mut merged = uncached;
                    merged.extend(cached);
                    merged
                }
            };
            return self.force_to_top(merged);
        }

        self.sort_with(&mut streams, &criteria);
        self.force_to_top(streams)
    }

    fn sort_with(&self, streams: &mut [ParsedStream], criteria: &[SortKey]) {
        streams.sort_by(|a, b| {
            for key in criteria {
                let score_a = self.score(a, key.criterion);
                let score_b = self.score(b, key.criterion);
                let ordering = match key.direction {
                    SortDirection::Desc => score_b.partial_cmp(&score_a),
                    SortDirection::Asc => score_a.partial_cmp(&score_b),
                };
                match ordering.unwrap_or(Ordering::Equal) {
                    Ordering::Equal => continue,
                    decided => return decided,
                }
            }
            Ordering::Equal
        });
    }

    /// Providers flagged force-to-top move to the head after sorting.
    /// Ties between forced providers keep the configured provider order;
    /// within one provider the sorted order is preserved.
    fn force_to_top(&self, streams: Vec<ParsedStream>) -> Vec<ParsedStream> {
        let forced_ids: Vec<&str> = self
            .user
            .providers
            .iter()
            .filter(|p| p.force_to_top)
            .map(|p| p.instance_id.as_str())
            .collect();
        if forced_ids.is_empty() {
            return streams;
        }

        let (mut forced, rest): (Vec<ParsedStream>, Vec<ParsedStream>) = streams
            .into_iter()
            .partition(|s| forced_ids.contains(&s.provider.as_str()));
        forced.sort_by_key(|s| self.user.provider_rank(&s.provider));

        forced.extend(rest);
        forced
    }

    /// Higher scores sort first under the descending direction
    fn score(&self, stream: &ParsedStream, criterion: SortCriterion) -> f64 {
        let preferred_position = |list: &[String], value: Option<&str>| -> f64 {
            match value {
                Some(value) => list
                    .iter()
                    .position(|t| t.eq_ignore_ascii_case(value))
                    .map(|p| (list.len() - p) as f64)
                    .unwrap_or(0.0),
                None => 0.0,
            }
        };
        let best_of_list = |preferred: &[String], values: &[String]| -> f64 {
            values
                .iter()
                .map(|v| preferred_position(preferred, Some(v)))
                .fold(0.0, f64::max)
        };
        let filters = &self.user.filters;
        let file = &stream.parsed_file;

        match criterion {
            SortCriterion::Quality => {
                preferred_position(&filters.qualities.preferred, file.quality.as_deref())
            }
            SortCriterion::Resolution => {
                preferred_position(&filters.resolutions.preferred, file.resolution.as_deref())
            }
            SortCriterion::Language => {
                best_of_list(&filters.languages.preferred, &file.languages)
            }
            SortCriterion::VisualTag => {
                best_of_list(&filters.visual_tags.preferred, &file.visual_tags)
            }
            SortCriterion::AudioTag => best_of_list(&filters.audio_tags.preferred, &file.audio_tags),
            SortCriterion::AudioChannel => {
                best_of_list(&filters.audio_channels.preferred, &file.audio_channels)
            }
            SortCriterion::StreamType => preferred_position(
                &filters.stream_types.preferred,
                Some(&stream.stream_type().to_string()),
            ),
            SortCriterion::Encode => {
                preferred_position(&filters.encodes.preferred, file.encode.as_deref())
            }
            SortCriterion::Size => stream.size.map(|s| s as f64).unwrap_or(0.0),
            SortCriterion::Seeders => stream
                .torrent
                .as_ref()
                .and_then(|t| t.seeders)
                .map(f64::from)
                .unwrap_or(0.0),
            SortCriterion::Service => match stream.service {
                Some(attribution) => {
                    let rank = self.user.service_rank(attribution.id);
                    if rank == usize::MAX {
                        0.0
                    } else {
                        (self.user.services.len() - rank) as f64
                    }
                }
                None => 0.0,
            },
            SortCriterion::Addon => {
                let rank = self.user.provider_rank(&stream.provider);
                if rank == usize::MAX {
                    0.0
                } else {
                    (self.user.providers.len() - rank) as f64
                }
            }
            SortCriterion::RegexPatterns => match stream.regex_matched {
                Some(index) => -(index as f64),
                None => f64::MIN,
            },
            SortCriterion::Keyword => match stream.keyword_matched {
                Some(index) => -(index as f64),
                None => f64::MIN,
            },
            SortCriterion::StreamExpressionMatched => match stream.stream_expression_matched {
                Some(index) => -(index as f64),
                None => f64::MIN,
            },
            SortCriterion::Cached => {
                if stream.is_cached() {
                    1.0
                } else {
                    0.0
                }
            }
            SortCriterion::Library => {
                if stream.library {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}
