//! Filesystem layout for podcast audio and transcripts.
//!
//! Files live under `{storage}/audio/{podcast_slug}/{date}_{title}.{ext}`
//! and `{storage}/transcripts/{podcast_slug}/{date}_{title}.md`. All
//! writes go through a temp file and an atomic rename.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::Result;

const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "wav", "ogg", "opus"];

/// Storage root handle
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    temp_root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_root: temp_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path for an episode's audio file
    pub fn audio_path(
        &self,
        podcast_title: &str,
        episode_title: &str,
        published_at: Option<DateTime<Utc>>,
        audio_url: &str,
    ) -> PathBuf {
        let filename = episode_filename(episode_title, published_at, audio_url);
        self.root
            .join("audio")
            .join(sanitize_podcast_name(podcast_title))
            .join(filename)
    }

    /// Full path for an episode's markdown transcript
    pub fn transcript_path(
        &self,
        podcast_title: &str,
        episode_title: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> PathBuf {
        let filename = format!(
            "{}_{}.md",
            date_prefix(published_at),
            sanitize_filename(episode_title, 80)
        );
        self.root
            .join("transcripts")
            .join(sanitize_podcast_name(podcast_title))
            .join(filename)
    }

    /// Temp path used while a download is in flight
    pub fn temp_download_path(&self, filename: &str) -> PathBuf {
        self.temp_root.join(format!(".downloading_{}", filename))
    }

    /// Write `contents` to `dest` via a temp file and atomic rename
    pub async fn write_atomic(&self, dest: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, dest).await?;
        Ok(())
    }

    /// Move a fully downloaded temp file into its final location
    pub async fn promote(&self, temp: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(temp, dest).await?;
        Ok(())
    }
}

/// Sanitize a string for use as a filename.
///
/// Unicode-normalizes to ASCII, replaces `<>:"/\|?*` and whitespace
/// with `_`, collapses runs, trims leading/trailing `_.`, truncates.
pub fn sanitize_filename(name: &str, max_length: usize) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;

    for c in name.chars() {
        let mapped: Option<char> = if c.is_ascii() {
            match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => Some('_'),
                c if c.is_whitespace() => Some('_'),
                c if c.is_control() => None,
                c => Some(c),
            }
        } else {
            // Best-effort ASCII fold for common Latin diacritics;
            // everything else is dropped like the NFKD+ignore pipeline.
            ascii_fold(c)
        };

        match mapped {
            Some('_') => {
                if !last_was_sep {
                    out.push('_');
                }
                last_was_sep = true;
            }
            Some(c) => {
                out.push(c);
                last_was_sep = false;
            }
            None => {}
        }
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    let mut result: String = trimmed.chars().take(max_length).collect();
    while result.ends_with('_') || result.ends_with('.') {
        result.pop();
    }

    if result.is_empty() {
        "unnamed".to_string()
    } else {
        result
    }
}

fn ascii_fold(c: char) -> Option<char> {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => Some('a'),
        'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => Some('A'),
        'é' | 'è' | 'ê' | 'ë' => Some('e'),
        'É' | 'È' | 'Ê' | 'Ë' => Some('E'),
        'í' | 'ì' | 'î' | 'ï' => Some('i'),
        'Í' | 'Ì' | 'Î' | 'Ï' => Some('I'),
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => Some('o'),
        'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => Some('O'),
        'ú' | 'ù' | 'û' | 'ü' => Some('u'),
        'Ú' | 'Ù' | 'Û' | 'Ü' => Some('U'),
        'ñ' => Some('n'),
        'Ñ' => Some('N'),
        'ç' => Some('c'),
        'Ç' => Some('C'),
        _ => None,
    }
}

/// Podcast directory slug (≤80 chars)
pub fn sanitize_podcast_name(name: &str) -> String {
    sanitize_filename(name, 80)
}

fn date_prefix(published_at: Option<DateTime<Utc>>) -> String {
    published_at
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d")
        .to_string()
}

/// Audio file extension sniffed from the URL path, defaulting to mp3
pub fn audio_extension(audio_url: &str) -> &'static str {
    // Ignore the query string when sniffing
    let path = audio_url
        .split(['?', '#'])
        .next()
        .unwrap_or(audio_url)
        .to_ascii_lowercase();

    for ext in AUDIO_EXTENSIONS {
        if path.contains(&format!(".{}", ext)) {
            return ext;
        }
    }
    "mp3"
}

/// `{YYYY-MM-DD}_{title_slug}.{ext}`
pub fn episode_filename(
    title: &str,
    published_at: Option<DateTime<Utc>>,
    audio_url: &str,
) -> String {
    format!(
        "{}_{}.{}",
        date_prefix(published_at),
        sanitize_filename(title, 80),
        audio_extension(audio_url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize_replaces_reserved_chars() {
        assert_eq!(sanitize_filename("a<b>c:d\"e/f\\g|h?i*j", 100), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn test_sanitize_collapses_runs_and_trims() {
        assert_eq!(sanitize_filename("  hello   world  ", 100), "hello_world");
        assert_eq!(sanitize_filename("__x__", 100), "x");
        assert_eq!(sanitize_filename("...dots...", 100), "dots");
    }

    #[test]
    fn test_sanitize_truncates_and_strips_trailing() {
        let long = "a".repeat(90) + "_tail";
        let result = sanitize_filename(&long, 80);
        assert_eq!(result.len(), 80);
        assert!(!result.ends_with('_'));
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename("", 80), "unnamed");
        assert_eq!(sanitize_filename("???", 80), "unnamed");
    }

    #[test]
    fn test_sanitize_folds_diacritics() {
        assert_eq!(sanitize_filename("Café Señor", 80), "Cafe_Senor");
    }

    #[test]
    fn test_audio_extension_sniffing() {
        assert_eq!(audio_extension("https://x.com/ep.mp3"), "mp3");
        assert_eq!(audio_extension("https://x.com/ep.M4A"), "m4a");
        assert_eq!(audio_extension("https://x.com/ep.opus?token=1"), "opus");
        assert_eq!(audio_extension("https://x.com/stream"), "mp3");
    }

    #[test]
    fn test_episode_filename_format() {
        let published = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let name = episode_filename("Episode #42: The Answer", Some(published), "https://x.com/a.mp3");
        assert_eq!(name, "2024-03-15_Episode_#42_The_Answer.mp3");
    }

    #[test]
    fn test_paths_are_partitioned_by_podcast() {
        let storage = Storage::new("/data/podcasts", "/data/temp");
        let published = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let audio = storage.audio_path("My Show", "Pilot", Some(published), "https://x.com/p.mp3");
        assert_eq!(
            audio,
            PathBuf::from("/data/podcasts/audio/My_Show/2024-01-02_Pilot.mp3")
        );

        let transcript = storage.transcript_path("My Show", "Pilot", Some(published));
        assert_eq!(
            transcript,
            PathBuf::from("/data/podcasts/transcripts/My_Show/2024-01-02_Pilot.md")
        );
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path(), dir.path().join("tmp"));

        let dest = dir.path().join("transcripts/Show/file.md");
        storage.write_atomic(&dest, b"# hi").await.unwrap();

        let contents = tokio::fs::read_to_string(&dest).await.unwrap();
        assert_eq!(contents, "# hi");
        assert!(!dest.with_extension("part").exists());
    }
}
