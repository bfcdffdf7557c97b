//! Media content ids: `owntone:{Title}:library:{type}:{id}:{subtype}`.
//!
//! Title and id are percent-encoded so they never contain `:`.

use std::borrow::Cow;

pub const SCHEME: &str = "owntone";
const LIBRARY: &str = "library";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaContent {
    pub title: String,
    /// `track`, `album`, `artist`, `playlist`, `genre`, …
    pub kind: String,
    pub id: String,
    pub subtype: String,
}

impl MediaContent {
    pub fn new(
        title: impl Into<String>,
        kind: impl Into<String>,
        id: impl Into<String>,
        subtype: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            kind: kind.into(),
            id: id.into(),
            subtype: subtype.into(),
        }
    }

    #[must_use]
    pub fn content_id(&self) -> String {
        format!(
            "{SCHEME}:{}:{LIBRARY}:{}:{}:{}",
            urlencoding::encode(&self.title),
            self.kind,
            urlencoding::encode(&self.id),
            self.subtype
        )
    }

    /// OwnTone URI: scheme, title and subtype dropped.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{LIBRARY}:{}:{}", self.kind, urlencoding::encode(&self.id))
    }

    /// `None` unless `content_id` has all six parts.
    #[must_use]
    pub fn parse(content_id: &str) -> Option<Self> {
        let parts: Vec<&str> = content_id.split(':').collect();
        let [scheme, title, library, kind, id, subtype] = parts.as_slice() else {
            return None;
        };
        if *scheme != SCHEME || *library != LIBRARY || kind.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self {
            title: urlencoding::decode(title).ok()?.into_owned(),
            kind: (*kind).to_string(),
            id: urlencoding::decode(id).ok()?.into_owned(),
            subtype: (*subtype).to_string(),
        })
    }
}

#[must_use]
pub fn is_owntone_content_id(content_id: &str) -> bool {
    content_id
        .strip_prefix(SCHEME)
        .is_some_and(|rest| rest.starts_with(':'))
}

/// URI to enqueue for `content_id`; anything but an OwnTone id is passed through.
#[must_use]
pub fn to_owntone_uri(content_id: &str) -> Cow<'_, str> {
    match MediaContent::parse(content_id) {
        Some(content) => Cow::Owned(content.uri()),
        None => Cow::Borrowed(content_id),
    }
}
