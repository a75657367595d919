//! HTML rendering helpers shared by the UI pages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Escapes text for inclusion in HTML bodies and attributes.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encodes a query parameter value.
pub fn encode_query(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Decimal byte-size display, `{:.2} kB/MB/GB/TB` above 1000 bytes.
pub fn format_size(size: u64) -> String {
    if size >= 1_000_000_000_000 {
        format!("{:.2} TB", size as f64 / 1e12)
    } else if size >= 1_000_000_000 {
        format!("{:.2} GB", size as f64 / 1e9)
    } else if size >= 1_000_000 {
        format!("{:.2} MB", size as f64 / 1e6)
    } else if size >= 1_000 {
        format!("{:.2} kB", size as f64 / 1e3)
    } else {
        format!("{size} B")
    }
}

pub fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_time_precise(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `last_used` display; `None` means the entry was never used.
pub fn format_last_used(t: Option<DateTime<Utc>>) -> String {
    t.map(format_time).unwrap_or_else(|| "-".to_owned())
}

/// Renders a key/value map as a definition list.
pub fn format_map(map: &BTreeMap<String, String>) -> String {
    let mut out = String::from("<dl>\n");
    for (key, value) in map {
        out.push_str(&format!(
            "<dt>{}</dt>\n<dd>{}</dd>\n",
            escape(key),
            escape(value)
        ));
    }
    out.push_str("</dl>\n");
    out
}

/// Wraps a content fragment in the page chrome.
pub fn page(title: &str, body: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html><head>
<meta charset="utf-8">
<title>{}</title>
<link rel="icon" type="image/svg+xml" href="/favicon.svg">
<link rel="mask-icon" href="/maskicon.svg" color="#4a85a9">
<link rel="stylesheet" href="/script/site.css">
<script src="/script/site.js" defer></script>
</head>
<body>
{}
</body></html>"##,
        escape(title),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_special_characters() {
        assert_eq!(escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn size_uses_decimal_prefixes() {
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(1_000), "1.00 kB");
        assert_eq!(format_size(1_500_000), "1.50 MB");
        assert_eq!(format_size(2_000_000_000), "2.00 GB");
        assert_eq!(format_size(3_100_000_000_000), "3.10 TB");
    }

    #[test]
    fn never_used_renders_as_dash() {
        assert_eq!(format_last_used(None), "-");
    }
}
