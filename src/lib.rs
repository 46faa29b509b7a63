//! # dialog-tts
//!
//! Batch dialog synthesis: turns tagged text lines or dialog rows into one
//! stitched speech file by running a reference-voice TTS engine per line.
//!
//! ## Pipeline
//!
//! 1. [`tags`] parses `[speaker:<name>, emotion:<name>]` prefixes into
//!    ordered [`tags::Utterance`]s.
//! 2. [`voices`] picks a reference voice per speaker, from an explicit map or
//!    round-robin over a [`corpus::ReferenceCorpus`].
//! 3. [`orchestrator`] calls the [`SynthesisEngine`] once per utterance and
//!    records a typed result for each, never aborting on a single bad line.
//! 4. [`stitch`] concatenates the successful segments in index order, can
//!    transcode the result, and always removes the temporary files.
//!
//! ## Quick Start
//!
//! ```ignore
//! use dialog_tts::{config::Config, pipeline::Pipeline, engines::f5::F5CommandEngine};
//!
//! let config = Config::load("conversation.yaml".as_ref())?;
//! let mut engine = F5CommandEngine::from_config(&config)?;
//! let utterances = dialog_tts::input::load_utterances(&config.dataset)?;
//! let summary = Pipeline::from_config(&config, "out".as_ref())?.run(&mut engine, &utterances)?;
//! println!("{summary}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod artifacts;
pub mod config;
pub mod corpus;
pub mod engines;
pub mod error;
pub mod input;
pub mod orchestrator;
pub mod pipeline;
pub mod stitch;
pub mod tags;
pub mod voices;

use std::path::Path;

pub use engines::{InferenceOptions, InferenceRequest, ModelSource};
pub use error::{CorpusError, EngineError, PipelineError, ReferenceError, StitchError};

/// Mono PCM audio held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    /// Raw audio samples as f32 values in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
}

impl AudioSample {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Read a WAV file, down-mixing to mono and normalising integer PCM.
    pub fn read_wav(path: &Path) -> Result<Self, hound::Error> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common interface for reference-voice text-to-speech engines.
///
/// The orchestrator owns the engine exclusively for the whole run and calls
/// [`SynthesisEngine::infer`] once per utterance, strictly sequentially.
pub trait SynthesisEngine {
    /// Prepare the model described by `model`. Engines that load lazily may
    /// keep the default, which does nothing.
    fn load_model(&mut self, model: &ModelSource) -> Result<(), EngineError> {
        let _ = model;
        Ok(())
    }

    /// Release the model and any associated resources.
    fn unload_model(&mut self) {}

    /// Synthesize `request.text` in the voice of `request.reference_audio`
    /// and write the result to `request.output_path`.
    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<(), EngineError>;
}
