//! RSS 2.0 parsing with the iTunes and podcast-namespace extensions.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{Error, Result};

/// Parsed episode data from an RSS item
#[derive(Debug, Clone)]
pub struct ParsedEpisode {
    pub guid: String,
    pub title: String,
    pub description: Option<String>,
    pub audio_url: String,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub transcript_url: Option<String>,
}

/// Parsed feed metadata and episodes
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub episodes: Vec<ParsedEpisode>,
}

const AUDIO_EXTENSIONS: [&str; 5] = [".mp3", ".m4a", ".wav", ".ogg", ".opus"];

/// Parse iTunes duration format to seconds.
///
/// Handles `HH:MM:SS`, `MM:SS`, and plain seconds.
pub fn parse_duration(duration_str: &str) -> Option<i64> {
    let duration_str = duration_str.trim();
    if duration_str.is_empty() {
        return None;
    }

    if let Ok(seconds) = duration_str.parse::<i64>() {
        return Some(seconds);
    }

    let parts: Vec<&str> = duration_str.split(':').collect();
    let nums: Option<Vec<i64>> = parts.iter().map(|p| p.parse::<i64>().ok()).collect();
    let nums = nums?;

    match nums.as_slice() {
        [hours, minutes, seconds] => Some(hours * 3600 + minutes * 60 + seconds),
        [minutes, seconds] => Some(minutes * 60 + seconds),
        _ => None,
    }
}

fn is_audio(url: &str, mime_type: &str) -> bool {
    if mime_type.contains("audio") {
        return true;
    }
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn parse_pub_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(text.trim()) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text.trim()) {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

#[derive(Default)]
struct ItemState {
    title: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    duration: Option<String>,
    pub_date: Option<String>,
    enclosures: Vec<(String, String)>,
    transcripts: Vec<(String, String)>,
}

impl ItemState {
    fn audio_url(&self) -> Option<String> {
        self.enclosures
            .iter()
            .find(|(url, mime)| is_audio(url, mime))
            .map(|(url, _)| url.clone())
    }

    fn transcript_url(&self) -> Option<String> {
        // Prefer text-adjacent formats, falling back to the first entry
        self.transcripts
            .iter()
            .find(|(_, t)| t.contains("srt") || t.contains("vtt") || t.contains("text"))
            .or_else(|| self.transcripts.first())
            .map(|(url, _)| url.clone())
    }

    fn finish(self) -> Option<ParsedEpisode> {
        let audio_url = self.audio_url()?;
        let guid = self.guid.clone().unwrap_or_else(|| audio_url.clone());
        let transcript_url = self.transcript_url();

        Some(ParsedEpisode {
            guid,
            title: self.title.unwrap_or_else(|| "Untitled Episode".to_string()),
            description: self.description,
            audio_url,
            duration_seconds: self.duration.as_deref().and_then(parse_duration),
            published_at: self.pub_date.as_deref().and_then(parse_pub_date),
            transcript_url,
        })
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| String::from_utf8(a.value.to_vec()).ok())
}

/// Parse RSS feed content.
///
/// Skips items without an audio enclosure; errors if the document is
/// not usable RSS or contains no channel.
pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut feed_title: Option<String> = None;
    let mut feed_description: Option<String> = None;
    let mut feed_image: Option<String> = None;
    let mut feed_author: Option<String> = None;
    let mut episodes: Vec<ParsedEpisode> = Vec::new();

    let mut item: Option<ItemState> = None;
    let mut path: Vec<String> = Vec::new();
    let mut saw_channel = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                if name == "channel" {
                    saw_channel = true;
                } else if name == "item" {
                    item = Some(ItemState::default());
                } else if name == "enclosure" || name == "media:content" {
                    if let Some(ref mut it) = item {
                        let url = attr_value(&e, b"url").or_else(|| attr_value(&e, b"href"));
                        let mime = attr_value(&e, b"type").unwrap_or_default();
                        if let Some(url) = url {
                            it.enclosures.push((url, mime));
                        }
                    }
                } else if name == "podcast:transcript" {
                    if let Some(ref mut it) = item {
                        if let Some(url) = attr_value(&e, b"url") {
                            let mime = attr_value(&e, b"type").unwrap_or_default();
                            it.transcripts.push((url, mime));
                        }
                    }
                } else if name == "itunes:image" && item.is_none() {
                    if feed_image.is_none() {
                        feed_image = attr_value(&e, b"href");
                    }
                }

                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                match name.as_str() {
                    "enclosure" | "media:content" => {
                        if let Some(ref mut it) = item {
                            let url = attr_value(&e, b"url").or_else(|| attr_value(&e, b"href"));
                            let mime = attr_value(&e, b"type").unwrap_or_default();
                            if let Some(url) = url {
                                it.enclosures.push((url, mime));
                            }
                        }
                    }
                    "podcast:transcript" => {
                        if let Some(ref mut it) = item {
                            if let Some(url) = attr_value(&e, b"url") {
                                let mime = attr_value(&e, b"type").unwrap_or_default();
                                it.transcripts.push((url, mime));
                            }
                        }
                    }
                    "itunes:image" => {
                        if item.is_none() && feed_image.is_none() {
                            feed_image = attr_value(&e, b"href");
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                handle_text(
                    &path,
                    &text,
                    &mut item,
                    &mut feed_title,
                    &mut feed_description,
                    &mut feed_image,
                    &mut feed_author,
                );
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(&t).to_string();
                handle_text(
                    &path,
                    &text,
                    &mut item,
                    &mut feed_title,
                    &mut feed_description,
                    &mut feed_image,
                    &mut feed_author,
                );
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    if let Some(state) = item.take() {
                        if let Some(episode) = state.finish() {
                            episodes.push(episode);
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                if episodes.is_empty() {
                    return Err(Error::validation(format!("Failed to parse feed: {}", e)));
                }
                break;
            }
            Ok(_) => {}
        }
    }

    if !saw_channel {
        return Err(Error::validation("Not an RSS feed: no channel element"));
    }

    Ok(ParsedFeed {
        title: feed_title.unwrap_or_else(|| "Unknown Podcast".to_string()),
        description: feed_description,
        image_url: feed_image,
        author: feed_author,
        episodes,
    })
}

fn handle_text(
    path: &[String],
    text: &str,
    item: &mut Option<ItemState>,
    feed_title: &mut Option<String>,
    feed_description: &mut Option<String>,
    feed_image: &mut Option<String>,
    feed_author: &mut Option<String>,
) {
    let Some(current) = path.last() else { return };
    let text = text.trim();
    if text.is_empty() {
        return;
    }

    if let Some(it) = item {
        match current.as_str() {
            "title" => it.title.get_or_insert_with(|| text.to_string()),
            "guid" => it.guid.get_or_insert_with(|| text.to_string()),
            "description" | "itunes:summary" => {
                it.description.get_or_insert_with(|| text.to_string())
            }
            "itunes:duration" | "duration" => it.duration.get_or_insert_with(|| text.to_string()),
            "pubDate" => it.pub_date.get_or_insert_with(|| text.to_string()),
            _ => return,
        };
    } else {
        let in_channel = path.iter().any(|p| p == "channel");
        if !in_channel {
            return;
        }
        match current.as_str() {
            "title" => feed_title.get_or_insert_with(|| text.to_string()),
            "description" | "itunes:subtitle" => {
                feed_description.get_or_insert_with(|| text.to_string())
            }
            "url" if path.iter().any(|p| p == "image") => {
                feed_image.get_or_insert_with(|| text.to_string())
            }
            "itunes:author" => feed_author.get_or_insert_with(|| text.to_string()),
            _ => return,
        };
    }
}
