//! Transcript types and the speech-to-text seam.
//!
//! The STT engine itself is external; workers talk to it through the
//! [`SpeechToText`] trait. The engine is expensive to construct, so
//! [`TranscriptionService`] builds it lazily, at most once per process,
//! and is passed to the transcription worker as a dependency.

pub mod command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::Result;

/// Progress callback invoked with 0–100 percentages
pub type ProgressFn = Arc<dyn Fn(i64) + Send + Sync>;

/// A segment of transcribed text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Complete transcription result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub language_probability: f64,
}

impl TranscriptResult {
    /// The full transcript as a single string
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|seg| seg.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render the transcript as markdown.
    ///
    /// The full-text indexer parses this exact format: a title header,
    /// a language line, then one `**[MM:SS]** text` line per segment.
    pub fn to_markdown(&self, title: &str) -> String {
        let mut lines = Vec::new();

        if !title.is_empty() {
            lines.push(format!("# {}", title));
            lines.push(String::new());
        }

        lines.push(format!(
            "*Language: {} ({:.1}% confidence)*",
            self.language,
            self.language_probability * 100.0
        ));
        lines.push(String::new());

        for seg in &self.segments {
            lines.push(format!(
                "**[{}]** {}",
                format_timestamp(seg.start),
                seg.text.trim()
            ));
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

/// Format seconds as MM:SS, or HH:MM:SS past an hour
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as i64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Speech-to-text engine port
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe an audio file, reporting progress through `progress`.
    ///
    /// `duration_hint` is the episode length in seconds when known;
    /// engines that only see elapsed audio time need it to report a
    /// meaningful percentage.
    async fn transcribe(
        &self,
        audio_path: &Path,
        duration_hint: Option<i64>,
        progress: ProgressFn,
    ) -> Result<TranscriptResult>;

    /// Model identifier reported alongside transcripts
    fn model_name(&self) -> String;
}

type EngineFactory = Box<dyn Fn() -> Result<Arc<dyn SpeechToText>> + Send + Sync>;

/// Process-wide transcription service with lazy engine construction.
///
/// The engine is built on first use; the `OnceCell` guarantees a single
/// construction even under concurrent first calls.
pub struct TranscriptionService {
    engine: OnceCell<Arc<dyn SpeechToText>>,
    factory: EngineFactory,
}

impl TranscriptionService {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SpeechToText>> + Send + Sync + 'static,
    {
        Self {
            engine: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    /// Wrap an already-constructed engine (tests, the node agent)
    pub fn with_engine(engine: Arc<dyn SpeechToText>) -> Self {
        let cell = OnceCell::new();
        cell.set(engine).ok();
        Self {
            engine: cell,
            factory: Box::new(|| unreachable!("engine pre-set")),
        }
    }

    async fn engine(&self) -> Result<&Arc<dyn SpeechToText>> {
        self.engine.get_or_try_init(|| async { (self.factory)() }).await
    }

    pub async fn transcribe(
        &self,
        audio_path: &Path,
        duration_hint: Option<i64>,
        progress: ProgressFn,
    ) -> Result<TranscriptResult> {
        self.engine()
            .await?
            .transcribe(audio_path, duration_hint, progress)
            .await
    }

    pub async fn model_name(&self) -> Result<String> {
        Ok(self.engine().await?.model_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_result() -> TranscriptResult {
        TranscriptResult {
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 4.2,
                    text: " Hello and welcome. ".to_string(),
                },
                TranscriptSegment {
                    start: 4521.0,
                    end: 4530.0,
                    text: "Wrapping up.".to_string(),
                },
            ],
            language: "en".to_string(),
            language_probability: 0.987,
        }
    }

    #[test]
    fn test_markdown_format() {
        let md = sample_result().to_markdown("My Episode");
        let lines: Vec<&str> = md.lines().collect();

        assert_eq!(lines[0], "# My Episode");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "*Language: en (98.7% confidence)*");
        assert_eq!(lines[4], "**[00:00]** Hello and welcome.");
        assert_eq!(lines[6], "**[01:15:21]** Wrapping up.");
    }

    #[test]
    fn test_full_text_joins_segments() {
        assert_eq!(sample_result().full_text(), "Hello and welcome. Wrapping up.");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(75.9), "01:15");
        assert_eq!(format_timestamp(3600.0), "01:00:00");
        assert_eq!(format_timestamp(-3.0), "00:00");
    }

    struct CountingEngine;

    #[async_trait]
    impl SpeechToText for CountingEngine {
        async fn transcribe(
            &self,
            _audio_path: &Path,
            _duration_hint: Option<i64>,
            progress: ProgressFn,
        ) -> Result<TranscriptResult> {
            progress(50);
            progress(100);
            Ok(sample_result())
        }

        fn model_name(&self) -> String {
            "counting".to_string()
        }
    }

    #[tokio::test]
    async fn test_engine_constructed_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let builds_clone = builds.clone();

        let service = TranscriptionService::new(move || {
            builds_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingEngine) as Arc<dyn SpeechToText>)
        });

        let noop: ProgressFn = Arc::new(|_| {});
        service
            .transcribe(Path::new("/tmp/a.mp3"), None, noop.clone())
            .await
            .unwrap();
        service
            .transcribe(Path::new("/tmp/b.mp3"), None, noop)
            .await
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(service.model_name().await.unwrap(), "counting");
    }
}
