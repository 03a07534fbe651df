//! The deterministic stream pipeline
//!
//! After the fan-out merges provider responses, every request runs the same
//! stage order: filter → dedup → sort → proxy → format. Given identical
//! inputs and upstream responses the output order is fully deterministic:
//! the sort is stable and the merge order is the configured provider order.

pub mod dedup;
pub mod filter;
pub mod format;
pub mod proxy;
pub mod sort;

pub use dedup::DedupEngine;
pub use filter::FilterEngine;
pub use format::Formatter;
pub use proxy::ProxyEngine;
pub use sort::SortEngine;

use crate::config::LimitsConfig;
use crate::errors::AppResult;
use crate::models::{MediaType, ParsedStream, UserConfig};

/// Run the full post-merge pipeline over a merged candidate collection.
///
/// Streams from `result_passthrough` providers skip filtering, dedup and
/// sorting; they are appended after the processed set in merge order.
pub fn run(
    user: &UserConfig,
    media_type: MediaType,
    limits: &LimitsConfig,
    streams: Vec<ParsedStream>,
) -> AppResult<Vec<ParsedStream>> {
    let (passthrough, processed): (Vec<ParsedStream>, Vec<ParsedStream>) =
        streams.into_iter().partition(|s| {
            user.provider(&s.provider)
                .map(|p| p.result_passthrough)
                .unwrap_or(false)
        });

    let filtered = FilterEngine::new(user, media_type, limits)?.apply(processed)?;
    let deduped = DedupEngine::new(&user.dedup, user).apply(filtered);
    let sorted = SortEngine::new(user, media_type).apply(deduped);
    let mut proxied = ProxyEngine::new(&user.proxy).apply(sorted);

    proxied.extend(passthrough);

    let formatter = Formatter::new(&user.format);
    let formatted = proxied
        .into_iter()
        .map(|stream| {
            // Inline errors keep their own text; passthrough providers keep
            // whatever the upstream rendered
            let skip = matches!(
                stream.stream_type(),
                crate::models::StreamType::Error | crate::models::StreamType::Statistic
            ) || user
                .provider(&stream.provider)
                .map(|p| p.format_passthrough)
                .unwrap_or(false);
            if skip {
                stream
            } else {
                let mut stream = stream;
                let (name, description) = formatter.format(&stream);
                stream.formatted_name = Some(name);
                stream.formatted_description = Some(description);
                stream
            }
        })
        .collect();

    Ok(formatted)
}
