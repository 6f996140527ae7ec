//! Matching rules and notification rendering.
//!
//! A [`FrameProcessor`] turns one raw frame into zero or more direct
//! messages: decode, match created posts and reposts against a single watch
//! snapshot, render the text with its annotations, dispatch.

mod annotate;
#[cfg(test)]
pub(crate) mod fakes;
mod processor;
mod render;
mod richtext;
mod router;

pub use annotate::{append_annotations, Annotation, Annotator, EmbedSummary, DEFAULT_GIF_HOSTS};
pub use processor::FrameProcessor;
pub use render::{display_handle, post_message, repost_message, RepostedPost};
pub use richtext::{markdown_to_richtext, ByteSlice, Facet, FacetFeature, RichText};
pub use router::{Collaborators, Notifier, NotifyCounts, NotifyStats};
