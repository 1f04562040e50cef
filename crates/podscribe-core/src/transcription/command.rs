//! Subprocess adapter for external speech-to-text programs.
//!
//! The configured command is invoked with the audio path appended and
//! must emit on stdout a first line `language<TAB>probability` followed
//! by one `start<TAB>end<TAB>text` line per segment. Anything the
//! engine writes to stderr is logged, not parsed.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ProgressFn, SpeechToText, TranscriptResult, TranscriptSegment};
use crate::{Error, Result};

pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    model: String,
}

impl CommandEngine {
    /// Build from a whitespace-separated command line, e.g.
    /// `whisper-cli --model base --output tsv`
    pub fn from_command_line(command: &str, model: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::config("Empty transcription command"))?;

        Ok(Self {
            program,
            args: parts.collect(),
            model: model.to_string(),
        })
    }

    fn parse_header(line: &str) -> (String, f64) {
        let mut fields = line.splitn(2, '\t');
        let language = fields.next().unwrap_or("en").trim().to_string();
        let probability = fields
            .next()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .unwrap_or(1.0);
        (language, probability)
    }

    fn parse_segment(line: &str) -> Option<TranscriptSegment> {
        let mut fields = line.splitn(3, '\t');
        let start = fields.next()?.trim().parse::<f64>().ok()?;
        let end = fields.next()?.trim().parse::<f64>().ok()?;
        let text = fields.next()?.to_string();

        Some(TranscriptSegment { start, end, text })
    }
}

#[async_trait]
impl SpeechToText for CommandEngine {
    async fn transcribe(
        &self,
        audio_path: &Path,
        duration_hint: Option<i64>,
        progress: ProgressFn,
    ) -> Result<TranscriptResult> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(audio_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::transcription(format!("Failed to spawn {}: {}", self.program, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transcription("Engine stdout unavailable"))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut language = "en".to_string();
        let mut language_probability = 1.0;
        let mut segments: Vec<TranscriptSegment> = Vec::new();
        let mut saw_header = false;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if !saw_header {
                let (lang, prob) = Self::parse_header(&line);
                language = lang;
                language_probability = prob;
                saw_header = true;
                continue;
            }

            match Self::parse_segment(&line) {
                Some(seg) => {
                    if let Some(total) = duration_hint.filter(|t| *t > 0) {
                        let percent = (seg.end / total as f64 * 100.0).min(99.0);
                        progress(percent as i64);
                    }
                    segments.push(seg);
                }
                None => debug!("Ignoring unparseable engine line: {}", line),
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::transcription(format!(
                "Engine exited with {}",
                status
            )));
        }

        if segments.is_empty() {
            warn!("Engine produced no segments for {}", audio_path.display());
            return Err(Error::transcription("Transcription returned empty result"));
        }

        progress(100);

        Ok(TranscriptResult {
            segments,
            language,
            language_probability,
        })
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let (lang, prob) = CommandEngine::parse_header("en\t0.97");
        assert_eq!(lang, "en");
        assert!((prob - 0.97).abs() < f64::EPSILON);

        let (lang, prob) = CommandEngine::parse_header("de");
        assert_eq!(lang, "de");
        assert_eq!(prob, 1.0);
    }

    #[test]
    fn test_parse_segment() {
        let seg = CommandEngine::parse_segment("1.5\t4.25\t Hello there").unwrap();
        assert_eq!(seg.start, 1.5);
        assert_eq!(seg.end, 4.25);
        assert_eq!(seg.text, " Hello there");

        assert!(CommandEngine::parse_segment("not\tnumbers\tx").is_none());
        assert!(CommandEngine::parse_segment("1.0").is_none());
    }

    #[test]
    fn test_from_command_line() {
        let engine = CommandEngine::from_command_line("whisper-cli --fast", "base").unwrap();
        assert_eq!(engine.program, "whisper-cli");
        assert_eq!(engine.args, vec!["--fast"]);
        assert_eq!(engine.model_name(), "base");

        assert!(CommandEngine::from_command_line("", "base").is_err());
    }
}
