//! Speech request and result payloads.
//!
//! These are the `R` / `S` payload types carried inside the generic
//! request envelopes; ids and creation timestamps live on the envelope,
//! not here.

use serde::{Deserialize, Serialize};

use crate::types::{AudioFormat, AudioQuality};

/// Text-to-speech request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSynthesisRequest {
    /// Text to render as speech.
    pub text: String,
    /// Target voice; provider default when absent.
    pub target: Option<String>,
    /// Playback speed multiplier.
    pub speed: f64,
    pub format: AudioFormat,
    pub quality: AudioQuality,
    /// Reference audio for voice-cloning providers.
    pub source_uri: Option<String>,
}

impl Default for SpeechSynthesisRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            target: None,
            speed: 1.0,
            format: AudioFormat::Wav,
            quality: AudioQuality::High,
            source_uri: None,
        }
    }
}

impl SpeechSynthesisRequest {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: AudioQuality) -> Self {
        self.quality = quality;
        self
    }
}

/// Speech-to-text request payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechRecognitionRequest {
    /// Audio source to transcribe.
    pub uri: String,
    /// Include word timecodes in the transcript.
    pub timecodes: bool,
}

impl SpeechRecognitionRequest {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            timecodes: false,
        }
    }

    pub fn with_timecodes(mut self) -> Self {
        self.timecodes = true;
        self
    }
}

/// Synthesized audio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechSynthesisResult {
    pub audio: Vec<u8>,
    /// Length of the generated audio in seconds.
    pub length: f64,
    pub format: AudioFormat,
}

/// Transcription output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechRecognitionResult {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_defaults() {
        let request = SpeechSynthesisRequest::new("hello");
        assert_eq!(request.text, "hello");
        assert_eq!(request.speed, 1.0);
        assert_eq!(request.format, AudioFormat::Wav);
        assert_eq!(request.quality, AudioQuality::High);
        assert!(request.target.is_none());
    }

    #[test]
    fn synthesis_request_round_trips_through_json() {
        let request = SpeechSynthesisRequest::new("hi")
            .with_target("nova")
            .with_format(AudioFormat::Mp3)
            .with_quality(AudioQuality::Low);
        let json = serde_json::to_string(&request).unwrap();
        let parsed: SpeechSynthesisRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.target.as_deref(), Some("nova"));
        assert_eq!(parsed.format, AudioFormat::Mp3);
        assert_eq!(parsed.quality, AudioQuality::Low);
    }

    #[test]
    fn recognition_request_defaults_omit_timecodes() {
        let request: SpeechRecognitionRequest = serde_json::from_str("{}").unwrap();
        assert!(request.uri.is_empty());
        assert!(!request.timecodes);
    }
}
