//! Per-utterance synthesis.
//!
//! Utterances are synthesized one at a time, in index order. Each one ends
//! in exactly one [`SynthesisResult`]; a failed line is recorded and skipped,
//! never allowed to stop the batch.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::{TempArtifacts, Workspace};
use crate::engines::{InferenceOptions, InferenceRequest};
use crate::error::{EngineError, PipelineError, ReferenceError};
use crate::tags::Utterance;
use crate::voices::{VoiceReference, VoiceResolver};
use crate::SynthesisEngine;

/// Why an utterance produced no audio.
#[derive(thiserror::Error, Debug)]
pub enum SynthesisFailure {
    #[error("reference not found: {0}")]
    ReferenceNotFound(#[from] ReferenceError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled before synthesis")]
    Cancelled,
}

#[derive(Debug)]
pub enum SynthesisStatus {
    Succeeded { audio_path: PathBuf },
    Failed(SynthesisFailure),
}

#[derive(Debug)]
pub struct SynthesisResult {
    pub utterance_index: usize,
    pub status: SynthesisStatus,
}

impl SynthesisResult {
    pub fn succeeded(utterance_index: usize, audio_path: PathBuf) -> Self {
        Self {
            utterance_index,
            status: SynthesisStatus::Succeeded { audio_path },
        }
    }

    pub fn failed(utterance_index: usize, failure: SynthesisFailure) -> Self {
        Self {
            utterance_index,
            status: SynthesisStatus::Failed(failure),
        }
    }

    pub fn audio_path(&self) -> Option<&Path> {
        match &self.status {
            SynthesisStatus::Succeeded { audio_path } => Some(audio_path),
            SynthesisStatus::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&SynthesisFailure> {
        match &self.status {
            SynthesisStatus::Failed(failure) => Some(failure),
            SynthesisStatus::Succeeded { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.audio_path().is_some()
    }
}

impl fmt::Display for SynthesisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            SynthesisStatus::Succeeded { audio_path } => {
                write!(f, "#{} ok: {}", self.utterance_index, audio_path.display())
            }
            SynthesisStatus::Failed(failure) => {
                write!(f, "#{} skipped: {failure}", self.utterance_index)
            }
        }
    }
}

/// Cooperative cancellation, checked between utterances only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Orchestrator<'e, E: SynthesisEngine + ?Sized> {
    engine: &'e mut E,
    options: InferenceOptions,
    delay: Duration,
    cancel: CancelToken,
}

impl<'e, E: SynthesisEngine + ?Sized> Orchestrator<'e, E> {
    pub fn new(engine: &'e mut E, options: InferenceOptions) -> Self {
        Self {
            engine,
            options,
            delay: Duration::ZERO,
            cancel: CancelToken::new(),
        }
    }

    /// Pause after every engine call that is followed by another utterance.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Synthesize every utterance. Each output path is registered with
    /// `artifacts` before the engine writes to it.
    pub fn run(
        &mut self,
        utterances: &[Utterance],
        resolver: &mut VoiceResolver,
        workspace: &Workspace,
        artifacts: &mut TempArtifacts,
    ) -> Result<Vec<SynthesisResult>, PipelineError> {
        if utterances.is_empty() {
            return Err(PipelineError::Input("no utterances to synthesize".to_string()));
        }

        let mut ordered: Vec<&Utterance> = utterances.iter().collect();
        ordered.sort_by_key(|u| u.index);

        let total = ordered.len();
        let mut results = Vec::with_capacity(total);
        for (position, utterance) in ordered.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                results.push(SynthesisResult::failed(
                    utterance.index,
                    SynthesisFailure::Cancelled,
                ));
                continue;
            }

            log::info!(
                "Generating speech for line {}/{}: '{}' with speaker '{}', emotion '{}'",
                utterance.index + 1,
                total,
                utterance.text,
                utterance.speaker,
                utterance.emotion
            );

            let (result, called_engine) =
                self.synthesize_one(utterance, resolver, workspace, artifacts);
            match &result.status {
                SynthesisStatus::Succeeded { audio_path } => {
                    log::info!("Line {} -> {}", utterance.index + 1, audio_path.display())
                }
                SynthesisStatus::Failed(failure) => {
                    log::error!("Skipping line {}: {failure}", utterance.index + 1)
                }
            }
            results.push(result);

            let more = position + 1 < total;
            if called_engine && more && !self.delay.is_zero() {
                log::debug!("Waiting {:.2?} before next engine call", self.delay);
                std::thread::sleep(self.delay);
            }
        }

        Ok(results)
    }

    /// Returns the result and whether the engine was actually invoked.
    fn synthesize_one(
        &mut self,
        utterance: &Utterance,
        resolver: &mut VoiceResolver,
        workspace: &Workspace,
        artifacts: &mut TempArtifacts,
    ) -> (SynthesisResult, bool) {
        let index = utterance.index;
        let voice = match resolver.resolve(utterance) {
            Ok(voice) => voice,
            Err(e) => return (SynthesisResult::failed(index, e.into()), false),
        };

        // Removed when dropped at the end of this call, success or not.
        let reference_file = match materialize(&voice) {
            Ok(file) => file,
            Err(e) => return (SynthesisResult::failed(index, e.into()), false),
        };

        let output_path = workspace.segment_path(utterance);
        artifacts.register(&output_path);

        let request = InferenceRequest {
            reference_audio: reference_file.path(),
            reference_text: &voice.transcript,
            text: &utterance.text,
            output_path: &output_path,
            options: &self.options,
        };
        let result = match self.engine.infer(&request) {
            Ok(()) => SynthesisResult::succeeded(index, output_path),
            Err(e) => SynthesisResult::failed(index, e.into()),
        };
        (result, true)
    }
}

/// Write the reference voice to a scoped temporary WAV file.
fn materialize(voice: &VoiceReference) -> std::io::Result<tempfile::NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("dialog-tts-ref-")
        .suffix(".wav")
        .tempfile()?;
    voice.audio.write_wav(file.path()).map_err(|e| match e {
        hound::Error::IoError(io) => io,
        other => std::io::Error::other(other),
    })?;
    Ok(file)
}
