//! URLRewriter: replaces local references with the registered cloud URL
//! on every read surface.
//!
//! All variants of a synced object resolve to its single cloud URL.

use crate::config::SyncSettings;
use crate::models::{
    ObjectId,
    object::{MediaObject, file_name_of},
};
use crate::services::{error::SyncResult, registry::AttachmentRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};
use tracing::{debug, instrument};

/// A value read from the object store that may expose local URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Readable {
    /// Direct URL of the object or one of its variants.
    Url(String),
    /// Resolved image source of a requested size.
    ImageSrc(ImageSource),
    /// Responsive `srcset` attribute value.
    Srcset(String),
    /// Rendered embed HTML of the object.
    EmbedHtml(String),
    /// HTML handed to an editor, referencing the object.
    EditorHtml(String),
    /// Metadata serialized for a UI layer.
    Metadata(Value),
    /// Free text that may reference any object by URL.
    Content(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Clone)]
pub struct UrlRewriter {
    settings: Arc<SyncSettings>,
    registry: AttachmentRegistry,
}

impl UrlRewriter {
    pub fn new(settings: Arc<SyncSettings>, registry: AttachmentRegistry) -> Self {
        Self { settings, registry }
    }

    /// Return `value` with every local reference replaced by the cloud URL
    /// of the object it belongs to. Values of unsynced objects come back
    /// unchanged, as does everything while sync is disabled.
    #[instrument(skip(self, value))]
    pub async fn rewrite(&self, object_id: Option<ObjectId>, value: Readable) -> SyncResult<Readable> {
        if !self.settings.enabled {
            return Ok(value);
        }
        if let Readable::Content(text) = value {
            return Ok(Readable::Content(self.rewrite_content(&text).await?));
        }

        let Some(id) = object_id else {
            return Ok(value);
        };
        let cloud_url = self.registry.get(id).await?.cloud_url;

        if let Readable::Metadata(meta) = value {
            return Ok(Readable::Metadata(rewrite_metadata(meta, cloud_url.as_deref())));
        }
        let Some(cloud_url) = cloud_url else {
            return Ok(value);
        };

        let rewritten = match value {
            Readable::Url(_) => Readable::Url(cloud_url),
            Readable::ImageSrc(source) => Readable::ImageSrc(ImageSource {
                url: cloud_url,
                ..source
            }),
            Readable::Srcset(srcset) => Readable::Srcset(rewrite_srcset(&srcset, &cloud_url)),
            Readable::EmbedHtml(html) => Readable::EmbedHtml(replace_src_attributes(&html, &cloud_url)),
            Readable::EditorHtml(html) => {
                let object = self.registry.get_object(id).await?;
                let names = object_file_names(&object);
                Readable::EditorHtml(replace_urls(&html, UrlScan::Any, |url| {
                    names
                        .contains(&url_file_name(url))
                        .then(|| cloud_url.clone())
                }))
            }
            other => other,
        };
        Ok(rewritten)
    }

    /// Cloud URL for a direct URL lookup, or the input when none applies.
    pub async fn rewrite_url(&self, object_id: ObjectId, url: &str) -> SyncResult<String> {
        match self.rewrite(Some(object_id), Readable::Url(url.to_string())).await? {
            Readable::Url(url) => Ok(url),
            _ => Ok(url.to_string()),
        }
    }

    /// Replace URLs under the local base URL with the cloud URL of the object
    /// they resolve to.
    pub async fn rewrite_content(&self, text: &str) -> SyncResult<String> {
        let Some(base) = self.settings.local_base_url.as_deref().filter(|b| !b.is_empty()) else {
            return Ok(text.to_string());
        };

        let mut resolved: HashMap<String, Option<String>> = HashMap::new();
        for url in find_urls(text, UrlScan::Prefix(base)) {
            if resolved.contains_key(url) {
                continue;
            }
            let cloud_url = match self.resolve_object_id(url).await? {
                Some(id) => self.registry.get(id).await?.cloud_url,
                None => None,
            };
            resolved.insert(url.to_string(), cloud_url);
        }

        Ok(replace_urls(text, UrlScan::Prefix(base), |url| {
            resolved.get(url).cloned().flatten()
        }))
    }

    /// Best-effort reverse lookup of the object a local URL points at.
    ///
    /// Tries the exact name, then the name with any `-WIDTHxHEIGHT` suffix
    /// stripped, then the declared variants. The lowest id wins.
    pub async fn resolve_object_id(&self, url: &str) -> SyncResult<Option<ObjectId>> {
        let name = url_file_name(url);
        if name.is_empty() {
            return Ok(None);
        }

        if let Some(id) = self.registry.find_ids_by_file_name(&name).await?.first() {
            return Ok(Some(*id));
        }
        let stripped = strip_size_suffix(&name);
        if stripped != name {
            if let Some(id) = self.registry.find_ids_by_file_name(&stripped).await?.first() {
                return Ok(Some(*id));
            }
        }
        let id = self.registry.find_ids_by_variant_name(&name).await?.first().copied();
        debug!(url, ?id, "reverse lookup");
        Ok(id)
    }

    /// Whether `url` names the object's primary file or one of its variants.
    pub async fn url_belongs_to_object(&self, url: &str, id: ObjectId) -> SyncResult<bool> {
        let object = self.registry.get_object(id).await?;
        let name = url_file_name(url);
        if name.is_empty() {
            return Ok(false);
        }
        let names = object_file_names(&object);
        Ok(names.contains(&name) || names.contains(&strip_size_suffix(&name)))
    }
}

fn object_file_names(object: &MediaObject) -> HashSet<String> {
    std::iter::once(object.file_name())
        .chain(
            object
                .variant_paths
                .iter()
                .map(|variant| file_name_of(Path::new(variant))),
        )
        .filter(|name| !name.is_empty())
        .collect()
}

fn rewrite_metadata(meta: Value, cloud_url: Option<&str>) -> Value {
    let Value::Object(mut fields) = meta else {
        return meta;
    };

    let Some(cloud_url) = cloud_url else {
        fields.insert("cloud_uploaded".into(), Value::Bool(false));
        return Value::Object(fields);
    };

    redirect_url_field(&mut fields, cloud_url);
    fields.insert("cloud_url".into(), Value::String(cloud_url.to_string()));
    if let Some(Value::Object(sizes)) = fields.get_mut("sizes") {
        for size in sizes.values_mut() {
            if let Value::Object(size) = size {
                redirect_url_field(size, cloud_url);
            }
        }
    }
    fields.insert("cloud_uploaded".into(), Value::Bool(true));
    Value::Object(fields)
}

/// `url` becomes the cloud URL; the previous value moves to `original_url`.
fn redirect_url_field(fields: &mut Map<String, Value>, cloud_url: &str) {
    if let Some(previous) = fields.insert("url".into(), Value::String(cloud_url.to_string())) {
        fields.entry("original_url").or_insert(previous);
    }
}

fn rewrite_srcset(srcset: &str, cloud_url: &str) -> String {
    srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| match candidate.split_once(char::is_whitespace) {
            Some((_, descriptor)) => format!("{} {}", cloud_url, descriptor.trim()),
            None => cloud_url.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Replace the value of every `src="..."` or `src='...'` attribute.
fn replace_src_attributes(html: &str, cloud_url: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(found) = lower[pos..].find("src=") {
        let value_start = pos + found + "src=".len();
        let boundary_ok = pos + found == 0 || {
            let prev = html.as_bytes()[pos + found - 1];
            !(prev.is_ascii_alphanumeric() || prev == b'-' || prev == b'_')
        };
        let quote = html.as_bytes().get(value_start).copied();
        let close = match quote {
            Some(q @ (b'"' | b'\'')) if boundary_ok => html[value_start + 1..]
                .find(q as char)
                .map(|end| value_start + 1 + end),
            _ => None,
        };

        match close {
            Some(close) => {
                out.push_str(&html[pos..value_start]);
                out.push('"');
                out.push_str(cloud_url);
                out.push('"');
                pos = close + 1;
            }
            None => {
                out.push_str(&html[pos..value_start]);
                pos = value_start;
            }
        }
    }
    out.push_str(&html[pos..]);
    out
}

#[derive(Clone, Copy)]
enum UrlScan<'a> {
    /// Absolute `http(s)://` URLs and quoted root-relative paths.
    Any,
    /// URLs starting with the given prefix.
    Prefix(&'a str),
}

fn is_url_end(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | ')' | '(' | '[' | ']')
}

/// Byte ranges of URLs found in `text`, in order.
fn url_spans(text: &str, scan: UrlScan<'_>) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        let start = match scan {
            UrlScan::Prefix(prefix) => rest.find(prefix).map(|i| pos + i),
            UrlScan::Any => {
                let candidates = [
                    rest.find("http://"),
                    rest.find("https://"),
                    rest.find("\"/").map(|i| i + 1),
                    rest.find("'/").map(|i| i + 1),
                ];
                candidates.into_iter().flatten().min().map(|i| pos + i)
            }
        };
        let Some(start) = start else {
            break;
        };
        let end = text[start..]
            .char_indices()
            .skip(1)
            .find(|(_, c)| is_url_end(*c))
            .map(|(i, _)| start + i)
            .unwrap_or(text.len());
        let end = start + text[start..end].trim_end_matches(['.', ',', ';', ':', '!', '?']).len();
        spans.push((start, end));
        pos = end.max(start + 1);
    }
    spans
}

fn find_urls<'t>(text: &'t str, scan: UrlScan<'_>) -> Vec<&'t str> {
    url_spans(text, scan)
        .into_iter()
        .map(|(start, end)| &text[start..end])
        .collect()
}

fn replace_urls(text: &str, scan: UrlScan<'_>, mut replace: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end) in url_spans(text, scan) {
        if let Some(replacement) = replace(&text[start..end]) {
            out.push_str(&text[last..start]);
            out.push_str(&replacement);
            last = end;
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Basename of a URL with query and fragment removed.
pub fn url_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// `photo-300x200.jpg` → `photo.jpg`. Names without the suffix are returned
/// unchanged.
pub fn strip_size_suffix(name: &str) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) => (&name[..dot], &name[dot..]),
        None => return name.to_string(),
    };
    let Some(dash) = stem.rfind('-') else {
        return name.to_string();
    };
    let is_size = stem[dash + 1..].split_once('x').is_some_and(|(w, h)| {
        !w.is_empty()
            && !h.is_empty()
            && w.bytes().all(|b| b.is_ascii_digit())
            && h.bytes().all(|b| b.is_ascii_digit())
    });
    if is_size {
        format!("{}{}", &stem[..dash], ext)
    } else {
        name.to_string()
    }
}
