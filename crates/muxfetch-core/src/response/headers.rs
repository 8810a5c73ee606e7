//! Parse collected HTTP response header lines.

/// Fields of interest from a response header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expires: Option<String>,
    pub retry_after: Option<String>,
    pub must_revalidate: bool,
}

/// Parse collected header lines. Status lines and blank lines are skipped;
/// later values win for repeated headers.
pub fn parse_headers(lines: &[String]) -> ResponseHeaders {
    let mut out = ResponseHeaders::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with("HTTP/") {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("etag") {
            out.etag = Some(value.trim_matches('"').to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            out.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("expires") {
            out.expires = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("retry-after") {
            out.retry_after = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("cache-control") {
            out.must_revalidate = value.split(',').any(|d| {
                let d = d.trim();
                d.eq_ignore_ascii_case("no-cache") || d.eq_ignore_ascii_case("must-revalidate")
            });
        }
    }

    out
}
