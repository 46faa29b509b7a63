//! YAML run configuration.
//!
//! ```yaml
//! dataset:
//!   dialog_data_path: data/dialogs.jsonl
//!   reference_corpus_path: refs/
//! model:
//!   repo: F5-TTS
//!   name: F5TTS_Base
//!   checkpoint_step: 1200000
//! audio:
//!   mel_spec_type: vocos
//!   sample_rate: 24000
//! synthesis:
//!   delay_secs: 0
//!   nfe_step: 32
//! output:
//!   file_name: conversation.wav
//!   transcode: mp3
//! voices:
//!   - { speaker: speaker1, emotion: happy, reference: speaker1_happy }
//! ```
//!
//! Every section and key is optional except that the dataset must name an
//! input source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engines::{f5, InferenceOptions, ModelSource};
use crate::error::PipelineError;
use crate::voices::VoiceMap;

const VOCODERS: &[&str] = &["vocos", "bigvgan"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub model: ModelSource,
    pub audio: AudioConfig,
    pub synthesis: SynthesisConfig,
    pub output: OutputConfig,
    pub engine: EngineConfig,
    /// Explicit voice table. Empty means round-robin over the corpus.
    pub voices: Vec<VoiceEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dialog rows as `.json` or `.jsonl`.
    pub dialog_data_path: Option<PathBuf>,
    /// Plain text, one tagged line per utterance.
    pub text_path: Option<PathBuf>,
    /// Directory of reference `*.wav` clips with `*.txt` transcripts.
    pub reference_corpus_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub mel_spec_type: String,
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mel_spec_type: "vocos".to_string(),
            sample_rate: 24000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Pause between engine calls, in seconds.
    pub delay_secs: f64,
    pub nfe_step: u32,
    pub cfg_strength: f32,
    pub sway_sampling_coef: f32,
    pub target_rms: f32,
    pub cross_fade_duration: f32,
    pub speed: f32,
    pub remove_silence: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        let opts = InferenceOptions::default();
        Self {
            delay_secs: 0.0,
            nfe_step: opts.nfe_step,
            cfg_strength: opts.cfg_strength,
            sway_sampling_coef: opts.sway_sampling_coef,
            target_rms: opts.target_rms,
            cross_fade_duration: opts.cross_fade_duration,
            speed: opts.speed,
            remove_silence: opts.remove_silence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// External ffmpeg; supports transcoding.
    #[default]
    Ffmpeg,
    /// In-process WAV concatenation; no transcoding.
    Wav,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Final file name inside the output directory.
    pub file_name: String,
    /// Target extension/codec for an extra compressed copy, e.g. `mp3`.
    pub transcode: Option<String>,
    /// Encoder VBR quality (`-qscale:a`), lower is better.
    pub quality: u8,
    pub trim_silence: bool,
    pub tool: ToolKind,
    pub ffmpeg_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_name: "conversation.wav".to_string(),
            transcode: None,
            quality: 2,
            trim_silence: false,
            tool: ToolKind::default(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Inference executable; defaults to `f5-tts_infer-cli`.
    pub command: Option<String>,
    pub device: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub speaker: String,
    #[serde(default)]
    pub emotion: Option<String>,
    /// Corpus id of the reference clip.
    pub reference: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        log::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let err = |msg: String| Err(PipelineError::Config(msg));

        match (&self.dataset.dialog_data_path, &self.dataset.text_path) {
            (None, None) => {
                return err("dataset.dialog_data_path or dataset.text_path is required".into())
            }
            (Some(_), Some(_)) => {
                return err("set only one of dataset.dialog_data_path and dataset.text_path".into())
            }
            _ => {}
        }
        if !VOCODERS.contains(&self.audio.mel_spec_type.as_str()) {
            return err(format!(
                "audio.mel_spec_type must be one of {VOCODERS:?}, got '{}'",
                self.audio.mel_spec_type
            ));
        }
        f5::check_checkpoint(&self.model, &self.audio.mel_spec_type)
            .map_err(|e| PipelineError::Config(format!("model: {e}")))?;
        if self.audio.sample_rate == 0 {
            return err("audio.sample_rate must be positive".into());
        }
        if !self.synthesis.delay_secs.is_finite() || self.synthesis.delay_secs < 0.0 {
            return err("synthesis.delay_secs must be a non-negative number".into());
        }
        if self.output.file_name.trim().is_empty() {
            return err("output.file_name must not be empty".into());
        }
        if let Some(format) = &self.output.transcode {
            if self.output.tool == ToolKind::Wav {
                return err("output.transcode requires output.tool: ffmpeg".into());
            }
            let same_as_output = Path::new(&self.output.file_name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(format.as_str()));
            if format.trim().is_empty() || same_as_output {
                return err(format!(
                    "output.transcode '{format}' must name a format other than the output's"
                ));
            }
        }
        if let Some(entry) = self
            .voices
            .iter()
            .find(|v| v.speaker.trim().is_empty() || v.reference.trim().is_empty())
        {
            return err(format!("voice entry {entry:?} needs a speaker and a reference"));
        }
        Ok(())
    }

    pub fn inference_options(&self) -> InferenceOptions {
        let s = &self.synthesis;
        InferenceOptions {
            nfe_step: s.nfe_step,
            cfg_strength: s.cfg_strength,
            sway_sampling_coef: s.sway_sampling_coef,
            target_rms: s.target_rms,
            cross_fade_duration: s.cross_fade_duration,
            speed: s.speed,
            vocoder: self.audio.mel_spec_type.clone(),
            sample_rate: self.audio.sample_rate,
            remove_silence: s.remove_silence,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.synthesis.delay_secs)
    }

    /// `None` when no explicit voices are configured.
    pub fn voice_map(&self) -> Option<VoiceMap> {
        if self.voices.is_empty() {
            return None;
        }
        Some(self.voices.iter().fold(VoiceMap::new(), |map, v| {
            map.with(v.speaker.as_str(), v.emotion.as_deref(), v.reference.as_str())
        }))
    }
}
