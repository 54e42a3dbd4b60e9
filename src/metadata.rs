use serde_json::Value;
use std::collections::HashMap;

use crate::types::StreamMetadata;

pub type Tags = HashMap<String, String>;

const ARTIST_KEYS: &[&str] = &["artist", "ARTIST", "Artist", "icy-artist"];
const TITLE_KEYS: &[&str] = &["title", "TITLE", "Title", "icy-title"];
/// Vendor-specific "Artist - Title" fields, highest priority first
const COMBINED_KEYS: &[&str] = &["icy-title", "StreamTitle", "streamtitle", "STREAMTITLE", "icy-name"];

const DASHES: &[char] = &['-', '\u{2013}', '\u{2014}'];

/// Flatten a raw tag map into strings, skipping values that are not scalars
pub fn tags_from_value(value: &Value) -> Tags {
    let Some(map) = value.as_object() else {
        return Tags::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

fn first_of(tags: &Tags, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| tags.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Split "Artist - Title" on the first dash that has a title after it.
/// Without a match the whole string is the title.
pub fn split_combined(combined: &str) -> (Option<String>, Option<String>) {
    let combined = combined.trim();
    for (index, dash) in combined.char_indices().filter(|(_, c)| DASHES.contains(c)) {
        let title = combined[index + dash.len_utf8()..].trim_start();
        if title.is_empty() {
            continue;
        }
        let artist = combined[..index].trim_end();
        let artist = (!artist.is_empty()).then(|| artist.to_string());
        return (artist, Some(title.to_string()));
    }
    let title = (!combined.is_empty()).then(|| combined.to_string());
    (None, title)
}

/// Best-effort artist/title for a live stream. Missing or malformed tags yield `None`s.
pub fn parse_stream_metadata(tags: &Tags) -> StreamMetadata {
    let mut artist = first_of(tags, ARTIST_KEYS);
    let mut title = first_of(tags, TITLE_KEYS);
    let combined = first_of(tags, COMBINED_KEYS);

    match (&artist, &title, combined) {
        (None, None, Some(combined)) => {
            let (a, t) = split_combined(&combined);
            artist = a;
            title = t;
        }
        (Some(known_artist), None, Some(combined)) => {
            let (_, derived_title) = split_combined(&combined);
            title = derived_title.filter(|t| t != known_artist);
        }
        (None, Some(known_title), Some(combined)) => {
            let (derived_artist, derived_title) = split_combined(&combined);
            if let Some(derived_artist) = derived_artist {
                // The title tag carried the combined string itself
                if combined == *known_title {
                    title = derived_title;
                }
                if title.as_deref() != Some(derived_artist.as_str()) {
                    artist = Some(derived_artist);
                }
            }
        }
        _ => {}
    }

    StreamMetadata { artist, title }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn meta(artist: Option<&str>, title: Option<&str>) -> StreamMetadata {
        StreamMetadata {
            artist: artist.map(str::to_string),
            title: title.map(str::to_string),
        }
    }

    #[test]
    fn splits_stream_title() {
        let parsed = parse_stream_metadata(&tags(&[("StreamTitle", "Daft Punk - One More Time")]));
        assert_eq!(parsed, meta(Some("Daft Punk"), Some("One More Time")));
    }

    #[test]
    fn title_only() {
        let parsed = parse_stream_metadata(&tags(&[("title", "Interstellar Overdrive")]));
        assert_eq!(parsed, meta(None, Some("Interstellar Overdrive")));
    }

    #[test]
    fn empty_tags() {
        assert_eq!(parse_stream_metadata(&Tags::new()), meta(None, None));
    }

    #[test]
    fn backfilled_title_is_not_duplicated() {
        let parsed = parse_stream_metadata(&tags(&[
            ("artist", "Boards of Canada"),
            ("StreamTitle", "Boards of Canada - Roygbiv"),
        ]));
        assert_eq!(parsed, meta(Some("Boards of Canada"), Some("Roygbiv")));
    }

    #[test]
    fn icy_title_alone_is_split() {
        let parsed = parse_stream_metadata(&tags(&[("icy-title", "Air \u{2014} La Femme d'Argent")]));
        assert_eq!(parsed, meta(Some("Air"), Some("La Femme d'Argent")));
    }

    #[test]
    fn combined_without_dash_is_title() {
        let parsed = parse_stream_metadata(&tags(&[("icy-title", "Station ID")]));
        assert_eq!(parsed, meta(None, Some("Station ID")));
    }

    #[test]
    fn explicit_tags_win_over_combined() {
        let parsed = parse_stream_metadata(&tags(&[
            ("ARTIST", "Can"),
            ("TITLE", "Vitamin C"),
            ("StreamTitle", "Someone - Else"),
        ]));
        assert_eq!(parsed, meta(Some("Can"), Some("Vitamin C")));
    }

    #[test]
    fn blank_values_are_absent() {
        let parsed = parse_stream_metadata(&tags(&[("artist", "  "), ("StreamTitle", " - ")]));
        assert_eq!(parsed, meta(None, Some("-")));
    }

    #[test]
    fn split_uses_first_dash_with_a_title() {
        assert_eq!(
            split_combined("Sonic Youth – Teen Age Riot"),
            (Some("Sonic Youth".into()), Some("Teen Age Riot".into()))
        );
        assert_eq!(split_combined("trailing -"), (None, Some("trailing -".into())));
    }

    #[test]
    fn non_string_values_are_tolerated() {
        let raw = serde_json::json!({"title": "Track", "track": 3, "art": {"nested": true}});
        let tags = tags_from_value(&raw);
        assert_eq!(tags.get("track").map(String::as_str), Some("3"));
        assert!(!tags.contains_key("art"));
        assert_eq!(parse_stream_metadata(&tags), meta(None, Some("Track")));
        assert!(tags_from_value(&Value::Null).is_empty());
    }
}
