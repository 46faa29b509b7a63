//! End-to-end run: utterances in, one stitched file out.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifacts::{TempArtifacts, Workspace};
use crate::config::{Config, ToolKind};
use crate::corpus::{DirectoryCorpus, ReferenceCorpus};
use crate::engines::{InferenceOptions, ModelSource};
use crate::error::PipelineError;
use crate::orchestrator::{CancelToken, Orchestrator};
use crate::stitch::{AudioTool, Ffmpeg, Stitcher, WavConcat};
use crate::tags::Utterance;
use crate::voices::{VoiceMap, VoiceResolver};
use crate::SynthesisEngine;

/// Pipeline-level progress. `Done` and `PartialFailure` are terminal and
/// both count as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Collecting,
    Synthesizing,
    Stitching,
    Done,
    PartialFailure,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub state: PipelineState,
    pub succeeded: usize,
    pub skipped: usize,
    /// `(utterance index, reason)` for each skipped utterance.
    pub failures: Vec<(usize, String)>,
    pub output: PathBuf,
    pub transcoded: Option<PathBuf>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped -> {}",
            self.succeeded,
            self.skipped,
            self.output.display()
        )?;
        if let Some(transcoded) = &self.transcoded {
            write!(f, " (+ {})", transcoded.display())?;
        }
        Ok(())
    }
}

pub struct Pipeline {
    corpus: Box<dyn ReferenceCorpus>,
    voice_map: Option<VoiceMap>,
    model: ModelSource,
    options: InferenceOptions,
    delay: Duration,
    stitcher: Stitcher,
    output: PathBuf,
    cancel: CancelToken,
}

impl Pipeline {
    /// `voice_map: None` selects round-robin assignment over `corpus`.
    pub fn new(
        corpus: Box<dyn ReferenceCorpus>,
        voice_map: Option<VoiceMap>,
        stitcher: Stitcher,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            corpus,
            voice_map,
            model: ModelSource::default(),
            options: InferenceOptions::default(),
            delay: Duration::ZERO,
            stitcher,
            output: output.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Build everything a config describes; the output lands in `output_dir`.
    pub fn from_config(config: &Config, output_dir: &Path) -> Result<Self, PipelineError> {
        let corpus_path = config.dataset.reference_corpus_path.as_deref().ok_or_else(|| {
            PipelineError::Config("dataset.reference_corpus_path is required".to_string())
        })?;
        let corpus = DirectoryCorpus::open(corpus_path)?;

        let tool: Box<dyn AudioTool> = match config.output.tool {
            ToolKind::Ffmpeg => Box::new(Ffmpeg::new(config.output.ffmpeg_path.as_str())),
            ToolKind::Wav => Box::new(WavConcat),
        };
        let mut stitcher = Stitcher::new(tool).with_silence_trim(config.output.trim_silence);
        if let Some(format) = &config.output.transcode {
            stitcher = stitcher.with_transcode(format.as_str(), config.output.quality);
        }

        Ok(Self::new(
            Box::new(corpus),
            config.voice_map(),
            stitcher,
            output_dir.join(&config.output.file_name),
        )
        .with_model(config.model.clone())
        .with_options(config.inference_options())
        .with_delay(config.delay()))
    }

    pub fn with_model(mut self, model: ModelSource) -> Self {
        self.model = model;
        self
    }

    /// `options.sample_rate` is also the rate of the stitched output.
    pub fn with_options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn run<E>(self, engine: &mut E, utterances: &[Utterance]) -> Result<RunSummary, PipelineError>
    where
        E: SynthesisEngine + ?Sized,
    {
        transition(PipelineState::Collecting);
        if utterances.is_empty() {
            return Err(PipelineError::Input("input contains no text to synthesize".to_string()));
        }
        engine.load_model(&self.model)?;
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            log::info!("Creating output directory at: {}", parent.display());
            std::fs::create_dir_all(parent)?;
        }

        let mut resolver = match self.voice_map {
            Some(map) => VoiceResolver::explicit(self.corpus, map),
            None => VoiceResolver::round_robin_for(self.corpus, utterances),
        };
        let workspace = Workspace::for_output(&self.output);
        // Dropping this on any early return deletes what was written so far.
        let mut artifacts = TempArtifacts::new();

        let sample_rate = self.options.sample_rate;
        transition(PipelineState::Synthesizing);
        let results = Orchestrator::new(engine, self.options)
            .with_delay(self.delay)
            .with_cancel_token(self.cancel.clone())
            .run(utterances, &mut resolver, &workspace, &mut artifacts)?;
        if self.cancel.is_cancelled() {
            log::warn!("Run cancelled; discarding synthesized segments");
            return Err(PipelineError::Cancelled);
        }

        let failures: Vec<(usize, String)> = results
            .iter()
            .filter_map(|r| r.failure().map(|f| (r.utterance_index, f.to_string())))
            .collect();
        let succeeded = results.len() - failures.len();

        transition(PipelineState::Stitching);
        let stitched = self
            .stitcher
            .with_sample_rate(sample_rate)
            .stitch(&results, &self.output, artifacts)?;

        let state = if failures.is_empty() {
            PipelineState::Done
        } else {
            PipelineState::PartialFailure
        };
        transition(state);

        let summary = RunSummary {
            state,
            succeeded,
            skipped: failures.len(),
            failures,
            output: stitched.output,
            transcoded: stitched.transcoded,
        };
        for (index, reason) in &summary.failures {
            log::warn!("Skipped line {}: {reason}", index + 1);
        }
        log::info!("Finished: {summary}");
        Ok(summary)
    }
}

fn transition(state: PipelineState) {
    log::debug!("Pipeline state: {state:?}");
}
