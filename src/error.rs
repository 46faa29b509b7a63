use std::path::PathBuf;

/// Fatal, whole-run errors. Anything recoverable per utterance is recorded
/// in a [`crate::orchestrator::SynthesisFailure`] instead.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Input error: {0}")]
    Input(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Model load failed: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Stitch(#[from] StitchError),
    #[error("Reference corpus error: {0}")]
    Corpus(#[from] CorpusError),
    #[error("Run cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single TTS engine invocation.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Engine executable '{0}' not found. Install F5-TTS (`pip install f5-tts`) or set engine.command.")]
    NotFound(String),
    #[error("Engine exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("Engine timed out after {0:.1}s")]
    Timeout(f64),
    #[error("Engine reported success but wrote no audio to {0}")]
    MissingOutput(PathBuf),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Checkpoint {0} is not the one f5-tts_infer-cli loads for this model; download it and set model.local_model_path")]
    UnpinnedCheckpoint(String),
    #[error("Model checkpoint not found at {0}")]
    ModelNotFound(PathBuf),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// No usable reference voice for an utterance.
#[derive(thiserror::Error, Debug)]
pub enum ReferenceError {
    #[error("No reference voice mapped for speaker '{speaker}', emotion '{emotion}'")]
    Unmapped { speaker: String, emotion: String },
    #[error("Reference corpus is empty; cannot assign a voice to speaker '{speaker}'")]
    EmptyCorpus { speaker: String },
    #[error("Reference '{id}' not found in corpus")]
    Missing { id: String },
    #[error("Reference '{id}' is unreadable: {source}")]
    Unreadable {
        id: String,
        #[source]
        source: CorpusError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum CorpusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum StitchError {
    #[error("No successfully synthesized segments to stitch")]
    NoSegments,
    #[error("'{0}' not found. Install ffmpeg or set output.tool to \"wav\".")]
    ToolNotFound(String),
    #[error("{tool} exited with code {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Transcode to {format} failed: {reason}")]
    Transcode { format: String, reason: String },
    #[error("Segment {path} does not match the first segment's format")]
    FormatMismatch { path: PathBuf },
    #[error("Segment {path} is {found} Hz but {expected} Hz output was requested; use output.tool: ffmpeg to resample")]
    SampleRateMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("Malformed concat manifest line: {0}")]
    Manifest(String),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
