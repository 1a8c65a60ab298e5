use opentelemetry::{KeyValue, Value};
use std::collections::HashMap;

/// Glob-style, case-insensitive match of `value` against `pattern`.
///
/// `*` matches any sequence of characters (including none) and `?` matches
/// exactly one character. Every other character, including regular
/// expression metacharacters, is matched literally.
///
/// The pattern `"*"` matches everything, even an absent value. Any other
/// pattern never matches an absent value, and the empty pattern only
/// matches the empty string.
pub fn wildcard_match(pattern: &str, value: Option<&str>) -> bool {
    if pattern == "*" {
        return true;
    }
    let Some(value) = value else {
        return false;
    };
    if pattern.is_empty() {
        return value.is_empty();
    }

    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = value.to_lowercase().chars().collect();

    let (mut px, mut tx) = (0, 0);
    // position of the last `*` seen and the text index it is currently
    // absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while tx < text.len() {
        match pattern.get(px) {
            Some('*') => {
                backtrack = Some((px, tx));
                px += 1;
            }
            Some(&c) if c == '?' || c == text[tx] => {
                px += 1;
                tx += 1;
            }
            _ => match backtrack {
                Some((star_px, star_tx)) => {
                    px = star_px + 1;
                    tx = star_tx + 1;
                    backtrack = Some((star_px, star_tx + 1));
                }
                None => return false,
            },
        }
    }

    pattern[px..].iter().all(|c| *c == '*')
}

/// Matches span attributes against the attribute patterns declared by a rule.
///
/// A rule without attribute patterns matches any span. Otherwise every
/// declared key must be present on the span with a string value matching the
/// declared pattern.
pub fn attribute_match(attributes: &[KeyValue], rule_attributes: &HashMap<String, String>) -> bool {
    if rule_attributes.is_empty() {
        return true;
    }
    if attributes.len() < rule_attributes.len() {
        return false;
    }

    rule_attributes.iter().all(|(key, pattern)| {
        let value = attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value);
        wildcard_match(pattern, value.and_then(string_value))
    })
}

/// The string payload of an attribute value; other value types never match
/// a wildcard pattern other than `*`.
pub(crate) fn string_value(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}
