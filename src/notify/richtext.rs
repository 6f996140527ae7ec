//! Markdown links to richtext facets.
//!
//! Chat messages carry plain text plus facets that annotate byte ranges.
//! `[label](https://...)` is rewritten to `label` with a link facet over it;
//! bare `http(s)://` URLs left in the text get a facet of their own.

use serde::Serialize;

/// Byte range of a facet, in UTF-8 bytes of the message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ByteSlice {
    #[serde(rename = "byteStart")]
    pub byte_start: usize,
    #[serde(rename = "byteEnd")]
    pub byte_end: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

impl Facet {
    fn link(byte_start: usize, byte_end: usize, uri: &str) -> Self {
        Self {
            index: ByteSlice {
                byte_start,
                byte_end,
            },
            features: vec![FacetFeature::Link {
                uri: uri.to_string(),
            }],
        }
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.index.byte_end && self.index.byte_start < end
    }
}

/// Message text with its facets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RichText {
    pub text: String,
    pub facets: Vec<Facet>,
}

/// Length of an `http://` or `https://` prefix at the start of `s`.
fn scheme_len(s: &str) -> Option<usize> {
    ["https://", "http://"]
        .iter()
        .find(|scheme| s.starts_with(**scheme))
        .map(|scheme| scheme.len())
}

/// Length of the run of non-whitespace characters at the start of `s`.
fn non_space_len(s: &str) -> usize {
    s.find(char::is_whitespace).unwrap_or(s.len())
}

/// A markdown link found in `text`: byte span, label and url.
struct MarkdownLink<'a> {
    start: usize,
    end: usize,
    label: &'a str,
    url: &'a str,
}

/// Leftmost `[label](url)` at or after `from`.
///
/// The label runs to the first `]`. The url is the longest non-whitespace
/// run that is followed by `)`, so parentheses inside urls survive.
fn find_markdown_link(text: &str, from: usize) -> Option<MarkdownLink<'_>> {
    let mut search = from;
    while let Some(offset) = text[search..].find('[') {
        let start = search + offset;
        search = start + 1;

        let Some(close) = text[start + 1..].find(']') else {
            return None;
        };
        let label_end = start + 1 + close;
        if label_end == start + 1 {
            continue;
        }
        let rest = &text[label_end + 1..];
        let Some(target) = rest.strip_prefix('(') else {
            continue;
        };
        let Some(scheme) = scheme_len(target) else {
            continue;
        };
        let run = &target[..non_space_len(target)];
        let Some(paren) = run.rfind(')') else {
            continue;
        };
        if paren <= scheme {
            continue;
        }

        let url_start = label_end + 2;
        return Some(MarkdownLink {
            start,
            end: url_start + paren + 1,
            label: &text[start + 1..label_end],
            url: &text[url_start..url_start + paren],
        });
    }
    None
}

/// Rewrite markdown links to facets and facet any remaining bare urls.
pub fn markdown_to_richtext(input: &str) -> RichText {
    let mut text = input.to_string();
    let mut facets: Vec<Facet> = Vec::new();

    let mut from = 0;
    while let Some(link) = find_markdown_link(&text, from) {
        let label = link.label.to_string();
        let url = link.url.to_string();
        let (start, end) = (link.start, link.end);

        text.replace_range(start..end, &label);
        facets.push(Facet::link(start, start + label.len(), &url));
        from = start + label.len();
    }

    let mut pos = 0;
    while pos < text.len() {
        let Some(offset) = text[pos..].find("http") else {
            break;
        };
        let start = pos + offset;
        let candidate = &text[start..];
        match scheme_len(candidate) {
            Some(scheme) => {
                let len = non_space_len(candidate);
                if len > scheme {
                    let end = start + len;
                    if !facets.iter().any(|f| f.overlaps(start, end)) {
                        facets.push(Facet::link(start, end, &text[start..end]));
                    }
                    pos = end;
                } else {
                    pos = start + scheme;
                }
            }
            None => pos = start + "http".len(),
        }
    }

    facets.sort_by_key(|f| f.index.byte_start);
    RichText { text, facets }
}
