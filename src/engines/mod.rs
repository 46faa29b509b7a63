//! Speech synthesis engines.
//!
//! The pipeline only needs something that implements
//! [`crate::SynthesisEngine`]; the types here describe what every engine is
//! handed. Option values are passed through untouched.
//!
//! # Available Engines
//!
//! - [`f5`] - F5-TTS via its inference CLI (`pip install f5-tts`)

pub mod f5;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where the model weights come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    /// Hugging Face repository under `SWivid/`.
    pub repo: String,
    /// Experiment/model name, e.g. `F5TTS_Base`.
    pub name: String,
    pub checkpoint_step: u64,
    /// Model architecture config file.
    pub config: Option<PathBuf>,
    /// Local checkpoint; takes precedence over the remote one.
    pub local_model_path: Option<PathBuf>,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            repo: "F5-TTS".to_string(),
            name: "F5TTS_Base".to_string(),
            checkpoint_step: 1_200_000,
            config: None,
            local_model_path: None,
        }
    }
}

impl ModelSource {
    /// Identifier of the checkpoint in use, for logs and traceability.
    pub fn checkpoint_uri(&self) -> String {
        match &self.local_model_path {
            Some(path) => path.display().to_string(),
            None => format!(
                "hf://SWivid/{}/{}/model_{}.safetensors",
                self.repo, self.name, self.checkpoint_step
            ),
        }
    }
}

/// Inference-time knobs forwarded to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    /// Number of denoising (function evaluation) steps.
    pub nfe_step: u32,
    /// Classifier-free guidance strength.
    pub cfg_strength: f32,
    /// Sway sampling coefficient.
    pub sway_sampling_coef: f32,
    /// Target RMS loudness of the generated audio.
    pub target_rms: f32,
    /// Cross-fade between internally generated chunks, in seconds.
    pub cross_fade_duration: f32,
    pub speed: f32,
    /// Mel vocoder, `vocos` or `bigvgan`.
    pub vocoder: String,
    pub sample_rate: u32,
    pub remove_silence: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            nfe_step: 32,
            cfg_strength: 2.0,
            sway_sampling_coef: -1.0,
            target_rms: 0.1,
            cross_fade_duration: 0.15,
            speed: 1.0,
            vocoder: "vocos".to_string(),
            sample_rate: 24000,
            remove_silence: false,
        }
    }
}

/// One engine call: speak `text` in the voice of `reference_audio`.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub reference_audio: &'a Path,
    /// What is said in the reference clip; may be empty.
    pub reference_text: &'a str,
    pub text: &'a str,
    pub output_path: &'a Path,
    pub options: &'a InferenceOptions,
}
