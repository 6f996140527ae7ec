//! Markers appended to notification text.

use crate::decode::{Embed, Post};
use std::fmt;

/// Hosts whose external links are shown as GIFs rather than link previews.
pub const DEFAULT_GIF_HOSTS: &[&str] = &["tenor.com"];

/// What a post embeds, reduced to what the message needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmbedSummary {
    Images,
    Video,
    External { uri: String },
    Quote,
}

impl EmbedSummary {
    /// Summarize a record embed. Unknown embeds have no summary.
    pub fn from_embed(embed: &Embed) -> Option<Self> {
        match embed {
            Embed::Images {} => Some(EmbedSummary::Images),
            Embed::Video {} => Some(EmbedSummary::Video),
            Embed::External { external } => Some(EmbedSummary::External {
                uri: external.uri.clone(),
            }),
            Embed::Record { .. } | Embed::RecordWithMedia {} => Some(EmbedSummary::Quote),
            Embed::Unknown => None,
        }
    }
}

/// One marker. Embed markers are mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Annotation {
    Reply,
    ContentWarning,
    Images,
    Video,
    Gif,
    LinkPreview,
    QuoteRepost,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Annotation::Reply => "[is a reply]",
            Annotation::ContentWarning => "[content warning]",
            Annotation::Images => "[has images]",
            Annotation::Video => "[has video]",
            Annotation::Gif => "[has GIF]",
            Annotation::LinkPreview => "[link preview]",
            Annotation::QuoteRepost => "[quote repost]",
        };
        f.write_str(text)
    }
}

/// Decides annotations for posts and reposted posts.
#[derive(Clone, Debug)]
pub struct Annotator {
    gif_hosts: Vec<String>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(DEFAULT_GIF_HOSTS.iter().map(|h| h.to_string()).collect())
    }
}

impl Annotator {
    pub fn new(gif_hosts: Vec<String>) -> Self {
        Self { gif_hosts }
    }

    /// Annotations for a post, in order: reply, content warning, embed.
    pub fn for_post(&self, post: &Post) -> Vec<Annotation> {
        let embed = post.embed.as_ref().and_then(EmbedSummary::from_embed);
        self.collect(post.is_reply(), post.has_content_warning(), embed.as_ref())
    }

    /// Annotations for a reposted post. Reply status is not shown for reposts.
    pub fn for_repost(&self, has_labels: bool, embed: Option<&EmbedSummary>) -> Vec<Annotation> {
        self.collect(false, has_labels, embed)
    }

    fn collect(
        &self,
        is_reply: bool,
        content_warning: bool,
        embed: Option<&EmbedSummary>,
    ) -> Vec<Annotation> {
        let mut out = Vec::with_capacity(3);
        if is_reply {
            out.push(Annotation::Reply);
        }
        if content_warning {
            out.push(Annotation::ContentWarning);
        }
        if let Some(embed) = embed {
            out.push(self.embed_annotation(embed));
        }
        out
    }

    fn embed_annotation(&self, embed: &EmbedSummary) -> Annotation {
        match embed {
            EmbedSummary::Images => Annotation::Images,
            EmbedSummary::Video => Annotation::Video,
            EmbedSummary::External { uri } if self.is_gif(uri) => Annotation::Gif,
            EmbedSummary::External { .. } => Annotation::LinkPreview,
            EmbedSummary::Quote => Annotation::QuoteRepost,
        }
    }

    fn is_gif(&self, uri: &str) -> bool {
        self.gif_hosts.iter().any(|host| uri.contains(host.as_str()))
    }
}

/// Append annotations to a message, each preceded by a space.
pub fn append_annotations(message: &mut String, annotations: &[Annotation]) {
    for annotation in annotations {
        message.push(' ');
        message.push_str(&annotation.to_string());
    }
}
