use std::sync::LazyLock;

use regex::Regex;

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid url regex"));

/// Turns bare URLs in already-escaped text into links that open in a new tab.
pub fn linkify(escaped: &str) -> String {
    URL_RE
        .replace_all(escaped, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            let url = trim_url_tail(matched);
            let rest = &matched[url.len()..];
            format!(
                r#"<a href="{url}" rel="noreferrer nofollow noopener" target="_blank">{url}</a>{rest}"#
            )
        })
        .into_owned()
}

/// Drops trailing punctuation and escaped quotes or brackets from a URL match.
fn trim_url_tail(mut url: &str) -> &str {
    loop {
        if let Some(rest) = ["&quot;", "&apos;", "&gt;", "&lt;"]
            .iter()
            .find_map(|entity| url.strip_suffix(entity))
        {
            url = rest;
        } else if let Some(rest) = url.strip_suffix(['.', ',', ';', ':', '!', '?', ')']) {
            url = rest;
        } else {
            return url;
        }
    }
}

/// Python-style title case: first letter of each alphabetic run upper-cased.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_is_alpha = false;
    for c in input.chars() {
        if c.is_alphabetic() {
            if prev_is_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_alpha = true;
        } else {
            out.push(c);
            prev_is_alpha = false;
        }
    }
    out
}

/// Decimal size without a space, e.g. `1.2MB`.
pub fn natural_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];
    if bytes == 1 {
        return "1Byte".to_owned();
    }
    if bytes < 1_000 {
        return format!("{bytes}Bytes");
    }
    let mut value = bytes as f64 / 1_000.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1_000.0 {
            break;
        }
        value /= 1_000.0;
        unit = next;
    }
    format!("{value:.1}{unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkify_wraps_urls_and_keeps_trailing_punctuation() {
        let out = linkify("Read more at https://example.com/a?b=1&amp;c=2.");
        assert_eq!(
            out,
            "Read more at <a href=\"https://example.com/a?b=1&amp;c=2\" rel=\"noreferrer nofollow noopener\" target=\"_blank\">https://example.com/a?b=1&amp;c=2</a>."
        );
        assert_eq!(linkify("no links here"), "no links here");
    }

    #[test]
    fn linkify_leaves_escaped_quotes_outside_the_link() {
        let out = linkify(&xml_escape("See \"https://x.com/a\")."));
        assert_eq!(
            out,
            "See &quot;<a href=\"https://x.com/a\" rel=\"noreferrer nofollow noopener\" target=\"_blank\">https://x.com/a</a>&quot;)."
        );
    }

    #[test]
    fn title_case_matches_python_semantics() {
        assert_eq!(title_case("arts & culture"), "Arts & Culture");
        assert_eq!(title_case("ONLINE magazines"), "Online Magazines");
    }

    #[test]
    fn natural_size_uses_decimal_units() {
        assert_eq!(natural_size(1), "1Byte");
        assert_eq!(natural_size(999), "999Bytes");
        assert_eq!(natural_size(1_234), "1.2kB");
        assert_eq!(natural_size(3_456_789), "3.5MB");
    }
}
