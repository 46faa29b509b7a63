//! F5-TTS engine driven through its inference CLI.
//!
//! # System Requirements
//!
//! The `f5-tts_infer-cli` entry point must be on `PATH`:
//!
//! ```text
//! pip install f5-tts
//! ```
//!
//! Each [`SynthesisEngine::infer`] call runs one CLI process. The process is
//! killed if it exceeds the configured timeout.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use derive_builder::Builder;

use crate::config::Config;
use crate::engines::{InferenceRequest, ModelSource};
use crate::error::{EngineError, PipelineError};
use crate::SynthesisEngine;

pub const DEFAULT_COMMAND: &str = "f5-tts_infer-cli";

/// Bytes of stderr kept for error messages.
const STDERR_TAIL: usize = 2048;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Checkpoints the CLI resolves by itself from `--model` and
/// `--vocoder_name`: `(model, vocoder, repo, step)`.
const CLI_CHECKPOINTS: &[(&str, &str, &str, u64)] = &[
    ("F5TTS_v1_Base", "vocos", "F5-TTS", 1_250_000),
    ("F5TTS_Base", "vocos", "F5-TTS", 1_200_000),
    ("F5TTS_Base", "bigvgan", "F5-TTS", 1_250_000),
    ("E2TTS_Base", "vocos", "E2-TTS", 1_200_000),
];

/// Make sure the checkpoint `model` names is the one the CLI will load.
///
/// A local checkpoint is always passed as `--ckpt_file`. Without one the
/// CLI picks its own repo and step for `--model`, so any other combination
/// would be silently ignored.
pub fn check_checkpoint(model: &ModelSource, vocoder: &str) -> Result<(), EngineError> {
    if model.local_model_path.is_some() {
        return Ok(());
    }
    let published = CLI_CHECKPOINTS.iter().any(|&(name, voc, repo, step)| {
        name == model.name && voc == vocoder && repo == model.repo && step == model.checkpoint_step
    });
    if published {
        Ok(())
    } else {
        Err(EngineError::UnpinnedCheckpoint(model.checkpoint_uri()))
    }
}

/// F5-TTS command-line engine.
///
/// ```rust,no_run
/// use dialog_tts::engines::f5::F5CommandEngineBuilder;
/// use std::time::Duration;
///
/// let engine = F5CommandEngineBuilder::default()
///     .device("cuda")
///     .timeout(Duration::from_secs(300))
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Builder)]
pub struct F5CommandEngine {
    /// Executable to run.
    #[builder(default = "DEFAULT_COMMAND.to_string()", setter(into))]
    command: String,
    /// `cpu`, `cuda` or `mps`; `None` lets F5-TTS pick.
    #[builder(default, setter(into, strip_option))]
    device: Option<String>,
    #[builder(default, setter(strip_option))]
    timeout: Option<Duration>,
    #[builder(setter(skip))]
    model: Option<ModelSource>,
}

impl F5CommandEngine {
    pub fn new() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            device: None,
            timeout: None,
            model: None,
        }
    }

    /// Engine described by the `engine` section of a run config.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let mut builder = F5CommandEngineBuilder::default();
        if let Some(command) = &config.engine.command {
            builder.command(command.as_str());
        }
        if let Some(device) = &config.engine.device {
            builder.device(device.as_str());
        }
        if let Some(secs) = config.engine.timeout_secs {
            builder.timeout(Duration::from_secs(secs));
        }
        builder
            .build()
            .map_err(|e| PipelineError::Config(format!("engine: {e}")))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Full argument list for one request (without the executable).
    fn build_args(
        &self,
        model: &ModelSource,
        request: &InferenceRequest<'_>,
    ) -> Result<Vec<OsString>, EngineError> {
        let output_dir = request
            .output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let output_file = request.output_path.file_name().ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "output path {} has no file name",
                request.output_path.display()
            ))
        })?;

        let opts = request.options;
        check_checkpoint(model, &opts.vocoder)?;

        let mut args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };

        push("--model", model.name.clone().into());
        if let Some(ckpt) = &model.local_model_path {
            push("--ckpt_file", ckpt.clone().into());
        }
        if let Some(cfg) = &model.config {
            push("--model_cfg", cfg.clone().into());
        }
        push("--ref_audio", request.reference_audio.into());
        push("--ref_text", request.reference_text.into());
        push("--gen_text", request.text.into());
        push("--output_dir", output_dir.into());
        push("--output_file", output_file.into());
        push("--vocoder_name", opts.vocoder.clone().into());
        push("--nfe_step", opts.nfe_step.to_string().into());
        push("--cfg_strength", opts.cfg_strength.to_string().into());
        push("--sway_sampling_coef", opts.sway_sampling_coef.to_string().into());
        push("--target_rms", opts.target_rms.to_string().into());
        push("--cross_fade_duration", opts.cross_fade_duration.to_string().into());
        push("--speed", opts.speed.to_string().into());
        if let Some(device) = &self.device {
            push("--device", device.clone().into());
        }
        if opts.remove_silence {
            args.push("--remove_silence".into());
        }

        Ok(args)
    }

    fn run(&self, args: Vec<OsString>) -> Result<(), EngineError> {
        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::NotFound(self.command.clone())
                } else {
                    EngineError::Io(e)
                }
            })?;

        // Drain stderr on a side thread so a chatty child never blocks on a
        // full pipe while we poll for exit.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                buf
            })
        });
        let collect_stderr = |reader: Option<std::thread::JoinHandle<Vec<u8>>>| {
            reader
                .and_then(|h| h.join().ok())
                .map(|buf| tail(&String::from_utf8_lossy(&buf), STDERR_TAIL))
                .unwrap_or_default()
        };

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    let stderr = collect_stderr(stderr_reader);
                    log::debug!("Engine stderr before timeout: {stderr}");
                    return Err(EngineError::Timeout(limit.as_secs_f64()));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stderr = collect_stderr(stderr_reader);
        if !status.success() {
            return Err(EngineError::Failed {
                code: status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

impl Default for F5CommandEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for F5CommandEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for F5CommandEngine {
    fn load_model(&mut self, model: &ModelSource) -> Result<(), EngineError> {
        if let Some(path) = &model.local_model_path {
            if !path.exists() {
                return Err(EngineError::ModelNotFound(path.clone()));
            }
        }
        log::info!("Using model checkpoint {}", model.checkpoint_uri());
        self.model = Some(model.clone());
        Ok(())
    }

    fn unload_model(&mut self) {
        self.model = None;
    }

    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<(), EngineError> {
        let model = self.model.as_ref().ok_or(EngineError::ModelNotLoaded)?;
        if request.text.trim().is_empty() {
            return Err(EngineError::InvalidInput("empty generation text".to_string()));
        }

        let args = self.build_args(model, request)?;
        log::debug!("Running {} {:?}", self.command, args);
        self.run(args)?;

        if !request.output_path.is_file() {
            return Err(EngineError::MissingOutput(request.output_path.to_path_buf()));
        }
        Ok(())
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let s = s.trim_end();
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}
