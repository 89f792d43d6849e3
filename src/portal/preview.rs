use super::model::{ContentEntry, EntryId, MediaKind};

/// Which entry, if any, is shown in the detail overlay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewState {
    selected: Option<ContentEntry>,
}

impl PreviewState {
    pub fn selected(&self) -> Option<&ContentEntry> {
        self.selected.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.selected.is_some()
    }

    pub fn select(&mut self, entry: ContentEntry) {
        self.selected = Some(entry);
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }

    /// Closes the overlay if it shows `id`, e.g. after that entry was deleted.
    pub fn forget(&mut self, id: &EntryId) {
        if self.selected.as_ref().is_some_and(|entry| &entry.id == id) {
            self.selected = None;
        }
    }
}

/// How an entry's attachment is presented inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentView {
    Document { url: String },
    Image { url: String },
    Video { embed_url: String },
    Link { url: String },
}

impl AttachmentView {
    pub fn for_entry(entry: &ContentEntry, media: MediaKind) -> Option<Self> {
        let url = entry.attachment_url.as_deref()?.trim();
        if !is_renderable(url) {
            return None;
        }

        let view = match media {
            MediaKind::Document if is_image(url) => Self::Image { url: url.into() },
            MediaKind::Document => Self::Document { url: url.into() },
            MediaKind::Image => Self::Image { url: url.into() },
            MediaKind::Video => match youtube_embed(url) {
                Some(embed_url) => Self::Video { embed_url },
                None => Self::Link { url: url.into() },
            },
            MediaKind::Web => Self::Link { url: url.into() },
        };
        Some(view)
    }
}

/// `https://www.youtube.com/watch?v=ID` and `https://youtu.be/ID` both map to
/// `https://www.youtube.com/embed/ID`.
fn youtube_embed(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let rest = rest.strip_prefix("www.").unwrap_or(rest);

    let id = if let Some(path) = rest.strip_prefix("youtu.be/") {
        path.split(['?', '&', '#', '/']).next()?
    } else if let Some(query) = rest
        .strip_prefix("youtube.com/watch?")
        .or_else(|| rest.strip_prefix("m.youtube.com/watch?"))
    {
        query
            .split(['&', '#'])
            .find_map(|pair| pair.strip_prefix("v="))?
    } else if let Some(path) = rest.strip_prefix("youtube.com/embed/") {
        path.split(['?', '#', '/']).next()?
    } else {
        return None;
    };

    if id.is_empty() {
        return None;
    }
    Some(format!("https://www.youtube.com/embed/{id}"))
}

/// Whether `url` may be placed in an `href` or `src`: web URLs and blobs served
/// by this site only.
pub fn is_renderable(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://") || url.starts_with("/blobs/")
}

fn is_image(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let lower = path.to_ascii_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// File name offered when the attachment is downloaded.
///
/// Storage URLs carry the object path percent-encoded (`notes%2F…`) and the
/// upload prefix `{millis}_{uuid}_`, both stripped here.
pub fn download_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.replace("%2F", "/").replace("%2f", "/");
    let last = path.rsplit('/').next().unwrap_or_default();
    let name = last.replace("%20", " ");

    let stripped = {
        let mut parts = name.splitn(3, '_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(millis), Some(uuid), Some(rest))
                if !rest.is_empty()
                    && millis.chars().all(|c| c.is_ascii_digit())
                    && uuid.len() == 32
                    && uuid.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Some(rest.to_string())
            }
            _ => None,
        }
    };

    match stripped {
        Some(rest) => rest,
        None if name.is_empty() => "download".to_string(),
        None => name,
    }
}
