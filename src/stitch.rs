//! Ordered concatenation of synthesized segments.
//!
//! The stitcher takes ownership of the run's [`TempArtifacts`], so every
//! segment, trimmed copy and the manifest are deleted when it returns,
//! whether concatenation succeeded or not.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::artifacts::{TempArtifacts, Workspace};
use crate::error::StitchError;
use crate::orchestrator::SynthesisResult;
use crate::AudioSample;

/// Samples at or below this magnitude count as silence when trimming.
pub const SILENCE_THRESHOLD: f32 = 1e-3;

/// Bytes of tool stderr kept for error messages.
const STDERR_TAIL: usize = 2048;

/// Lossless concatenation and optional transcoding.
pub trait AudioTool {
    fn name(&self) -> &str;

    /// Concatenate the files listed in `manifest` (ffmpeg concat format)
    /// into `output`. With `sample_rate: None` the audio is copied as is;
    /// `Some(rate)` asks for the output at that rate.
    fn concat(
        &self,
        manifest: &Path,
        output: &Path,
        sample_rate: Option<u32>,
    ) -> Result<(), StitchError>;

    /// Encode `input` into `output`, choosing the codec from `format`.
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: &str,
        quality: u8,
    ) -> Result<(), StitchError>;
}

/// The external `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: String,
}

impl Ffmpeg {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[OsString]) -> Result<(), StitchError> {
        log::debug!("Running {} {:?}", self.program, args);
        let output = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StitchError::ToolNotFound(self.program.clone())
                } else {
                    StitchError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim_end();
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let start = (start..=stderr.len())
                .find(|&i| stderr.is_char_boundary(i))
                .unwrap_or(stderr.len());
            return Err(StitchError::ToolFailed {
                tool: self.program.clone(),
                code: output.status.code(),
                stderr: stderr[start..].to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl AudioTool for Ffmpeg {
    fn name(&self) -> &str {
        &self.program
    }

    fn concat(
        &self,
        manifest: &Path,
        output: &Path,
        sample_rate: Option<u32>,
    ) -> Result<(), StitchError> {
        self.run(&concat_args(manifest, output, sample_rate))
    }

    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: &str,
        quality: u8,
    ) -> Result<(), StitchError> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        if let Some(encoder) = encoder_for(format) {
            args.push("-codec:a".into());
            args.push(encoder.into());
        }
        args.push("-qscale:a".into());
        args.push(quality.to_string().into());
        args.push(output.into());
        self.run(&args)
    }
}

/// Concat-demuxer arguments. Stream copy unless a resample is requested.
fn concat_args(manifest: &Path, output: &Path, sample_rate: Option<u32>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        manifest.into(),
    ];
    match sample_rate {
        Some(rate) => {
            args.push("-ar".into());
            args.push(rate.to_string().into());
        }
        None => {
            args.push("-c".into());
            args.push("copy".into());
        }
    }
    args.push(output.into());
    args
}

/// Audio encoder for a target extension; `None` lets ffmpeg choose.
fn encoder_for(format: &str) -> Option<&'static str> {
    match format.to_ascii_lowercase().as_str() {
        "mp3" => Some("libmp3lame"),
        "ogg" => Some("libvorbis"),
        "opus" => Some("libopus"),
        "m4a" | "aac" => Some("aac"),
        "flac" => Some("flac"),
        _ => None,
    }
}

/// In-process WAV concatenation. All segments must share one WAV format,
/// and it cannot resample: a requested rate must already be the segments'.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavConcat;

impl AudioTool for WavConcat {
    fn name(&self) -> &str {
        "wav"
    }

    fn concat(
        &self,
        manifest: &Path,
        output: &Path,
        sample_rate: Option<u32>,
    ) -> Result<(), StitchError> {
        let content = std::fs::read_to_string(manifest)?;
        let paths = parse_manifest(&content)?;

        let check_rate = |path: &Path, found: u32| match sample_rate {
            Some(expected) if expected != found => Err(StitchError::SampleRateMismatch {
                path: path.to_path_buf(),
                found,
                expected,
            }),
            _ => Ok(()),
        };

        let Some(first) = paths.first() else {
            return Err(StitchError::NoSegments);
        };
        let spec = hound::WavReader::open(first)?.spec();
        check_rate(first, spec.sample_rate)?;
        let mut writer = hound::WavWriter::create(output, spec)?;

        for path in &paths {
            let mut reader = hound::WavReader::open(path)?;
            check_rate(path, reader.spec().sample_rate)?;
            if reader.spec() != spec {
                return Err(StitchError::FormatMismatch { path: path.clone() });
            }
            match spec.sample_format {
                hound::SampleFormat::Float => {
                    for s in reader.samples::<f32>() {
                        writer.write_sample(s?)?;
                    }
                }
                hound::SampleFormat::Int => {
                    for s in reader.samples::<i32>() {
                        writer.write_sample(s?)?;
                    }
                }
            }
        }

        writer.finalize()?;
        Ok(())
    }

    fn transcode(&self, _: &Path, _: &Path, format: &str, _: u8) -> Result<(), StitchError> {
        Err(StitchError::Transcode {
            format: format.to_string(),
            reason: "the wav tool cannot transcode; use ffmpeg".to_string(),
        })
    }
}

/// Files produced by a successful stitch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchOutput {
    pub output: PathBuf,
    pub transcoded: Option<PathBuf>,
    pub segments: usize,
}

pub struct Stitcher {
    tool: Box<dyn AudioTool>,
    transcode: Option<(String, u8)>,
    trim_silence: bool,
    sample_rate: Option<u32>,
}

impl Stitcher {
    pub fn new(tool: Box<dyn AudioTool>) -> Self {
        Self {
            tool,
            transcode: None,
            trim_silence: false,
            sample_rate: None,
        }
    }

    /// Also produce `<output>.<format>` at the given encoder quality.
    pub fn with_transcode(mut self, format: impl Into<String>, quality: u8) -> Self {
        self.transcode = Some((format.into(), quality));
        self
    }

    pub fn with_silence_trim(mut self, enabled: bool) -> Self {
        self.trim_silence = enabled;
        self
    }

    /// Required output sample rate. Segments at another rate are resampled
    /// by tools that can, and rejected by those that cannot.
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Concatenate the successful results in ascending index order.
    pub fn stitch(
        &self,
        results: &[SynthesisResult],
        output: &Path,
        mut artifacts: TempArtifacts,
    ) -> Result<StitchOutput, StitchError> {
        let mut succeeded: Vec<&SynthesisResult> =
            results.iter().filter(|r| r.is_success()).collect();
        succeeded.sort_by_key(|r| r.utterance_index);
        if succeeded.is_empty() {
            log::error!("No audio files to combine.");
            return Err(StitchError::NoSegments);
        }

        let originals: Vec<PathBuf> = succeeded
            .iter()
            .filter_map(|r| r.audio_path())
            .map(Path::to_path_buf)
            .collect();
        for path in &originals {
            artifacts.register(path);
        }
        let segments = if self.trim_silence {
            trim_all(&originals, &mut artifacts).unwrap_or(originals)
        } else {
            originals
        };

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let manifest = Workspace::for_output(output).manifest_path();
        artifacts.register(&manifest);
        write_manifest(&manifest, &segments)?;

        let resample = self
            .sample_rate
            .filter(|&rate| segments.iter().any(|s| !has_sample_rate(s, rate)));
        if let Some(rate) = resample {
            log::info!("Segments differ from the requested {rate} Hz; resampling output");
        }

        log::info!(
            "Concatenating {} segments into {} with {}",
            segments.len(),
            output.display(),
            self.tool.name()
        );
        if let Err(e) = self.tool.concat(&manifest, output, resample) {
            let _ = std::fs::remove_file(output);
            return Err(e);
        }

        let transcoded = match &self.transcode {
            Some((format, quality)) => {
                let target = output.with_extension(format);
                self.tool
                    .transcode(output, &target, format, *quality)
                    .map_err(|e| match e {
                        StitchError::Transcode { .. } => e,
                        other => StitchError::Transcode {
                            format: format.clone(),
                            reason: other.to_string(),
                        },
                    })?;
                log::info!("Converted to {}: {}", format.to_uppercase(), target.display());
                Some(target)
            }
            None => None,
        };

        Ok(StitchOutput {
            output: output.to_path_buf(),
            transcoded,
            segments: segments.len(),
        })
    }
}

fn write_manifest(manifest: &Path, segments: &[PathBuf]) -> Result<(), StitchError> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(manifest)?);
    for segment in segments {
        let absolute = std::fs::canonicalize(segment)?;
        writeln!(file, "{}", manifest_line(&absolute))?;
    }
    file.flush()?;
    Ok(())
}

/// One ffmpeg concat-demuxer entry; `'` is written as `'\''`.
fn manifest_line(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn parse_manifest(content: &str) -> Result<Vec<PathBuf>, StitchError> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
                .map(|quoted| PathBuf::from(quoted.replace(r"'\''", "'")))
                .ok_or_else(|| StitchError::Manifest(line.to_string()))
        })
        .collect()
}

/// Drop leading and trailing samples at or below [`SILENCE_THRESHOLD`].
/// Audio that is silent throughout is returned unchanged.
pub fn trim_silence(audio: &AudioSample) -> AudioSample {
    let loud = |s: &f32| s.abs() > SILENCE_THRESHOLD;
    match (
        audio.samples.iter().position(loud),
        audio.samples.iter().rposition(|s| loud(s)),
    ) {
        (Some(first), Some(last)) => {
            AudioSample::new(audio.samples[first..=last].to_vec(), audio.sample_rate)
        }
        _ => audio.clone(),
    }
}

/// Trimmed copies of every segment, or `None` if any one fails. Mixing
/// trimmed (float) and untrimmed segments would break a lossless concat.
fn trim_all(segments: &[PathBuf], artifacts: &mut TempArtifacts) -> Option<Vec<PathBuf>> {
    let mut trimmed = Vec::with_capacity(segments.len());
    for path in segments {
        let target = Workspace::trimmed_path(path);
        artifacts.register(&target);
        if let Err(e) = trim_file(path, &target) {
            log::warn!(
                "Silence trim failed for {}, stitching all segments untrimmed: {e}",
                path.display()
            );
            return None;
        }
        trimmed.push(target);
    }
    Some(trimmed)
}

/// Whether `path` is a WAV file at `rate`. Unreadable headers count as no.
fn has_sample_rate(path: &Path, rate: u32) -> bool {
    hound::WavReader::open(path).is_ok_and(|r| r.spec().sample_rate == rate)
}

fn trim_file(input: &Path, output: &Path) -> Result<(), hound::Error> {
    let audio = AudioSample::read_wav(input)?;
    trim_silence(&audio).write_wav(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SynthesisFailure;

    fn segment(dir: &Path, index: usize, value: f32) -> SynthesisResult {
        let path = dir.join(format!("out_{index:05}_A.wav"));
        AudioSample::new(vec![0.0, value, value, 0.0], 24000)
            .write_wav(&path)
            .unwrap();
        SynthesisResult::succeeded(index, path)
    }

    fn leftovers(dir: &Path, keep: &[&str]) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !keep.contains(&name.as_str()))
            .collect()
    }

    #[test]
    fn concatenates_successes_in_index_order_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![
            segment(dir.path(), 2, 0.3),
            SynthesisResult::failed(1, SynthesisFailure::Cancelled),
            segment(dir.path(), 0, 0.1),
        ];
        let output = dir.path().join("out.wav");

        let stitched = Stitcher::new(Box::new(WavConcat))
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap();
        assert_eq!(stitched.segments, 2);
        assert_eq!(stitched.transcoded, None);

        let audio = AudioSample::read_wav(&output).unwrap();
        assert_eq!(audio.samples, vec![0.0, 0.1, 0.1, 0.0, 0.0, 0.3, 0.3, 0.0]);
        assert!(leftovers(dir.path(), &["out.wav"]).is_empty());
    }

    #[test]
    fn no_successes_is_no_segments_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![SynthesisResult::failed(0, SynthesisFailure::Cancelled)];
        let output = dir.path().join("out.wav");

        let err = Stitcher::new(Box::new(WavConcat))
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap_err();
        assert!(matches!(err, StitchError::NoSegments));
        assert!(!output.exists());
    }

    #[test]
    fn trimmed_copies_are_used_then_removed() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![segment(dir.path(), 0, 0.5), segment(dir.path(), 1, 0.25)];
        let output = dir.path().join("out.wav");

        Stitcher::new(Box::new(WavConcat))
            .with_silence_trim(true)
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap();

        let audio = AudioSample::read_wav(&output).unwrap();
        assert_eq!(audio.samples, vec![0.5, 0.5, 0.25, 0.25]);
        assert!(leftovers(dir.path(), &["out.wav"]).is_empty());
    }

    #[test]
    fn mismatched_formats_fail_and_still_clean_up() {
        let dir = tempfile::tempdir().unwrap();
        let first = segment(dir.path(), 0, 0.5);
        let odd_path = dir.path().join("out_00001_B.wav");
        AudioSample::new(vec![0.5; 4], 16000).write_wav(&odd_path).unwrap();
        let results = vec![first, SynthesisResult::succeeded(1, odd_path)];
        let output = dir.path().join("out.wav");

        let err = Stitcher::new(Box::new(WavConcat))
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap_err();
        assert!(matches!(err, StitchError::FormatMismatch { .. }));
        assert!(leftovers(dir.path(), &[]).is_empty());
    }

    #[test]
    fn failed_trim_falls_back_to_untrimmed_for_every_segment() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("out_00000_A.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&first, spec).unwrap();
        for s in [0i16, 8192, 8192, 0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        // A directory where the trimmed copy should go makes that one trim fail.
        let second = dir.path().join("out_00001_B.wav");
        let mut writer = hound::WavWriter::create(&second, spec).unwrap();
        for s in [0i16, -8192, 0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        std::fs::create_dir(Workspace::trimmed_path(&second)).unwrap();

        let results = vec![
            SynthesisResult::succeeded(0, first),
            SynthesisResult::succeeded(1, second.clone()),
        ];
        let output = dir.path().join("out.wav");
        Stitcher::new(Box::new(WavConcat))
            .with_silence_trim(true)
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap();

        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.spec(), spec);
        assert_eq!(reader.len(), 7);
        std::fs::remove_dir(Workspace::trimmed_path(&second)).unwrap();
        assert!(leftovers(dir.path(), &["out.wav"]).is_empty());
    }

    #[test]
    fn output_keeps_the_requested_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![segment(dir.path(), 0, 0.5), segment(dir.path(), 1, 0.25)];
        let output = dir.path().join("out.wav");

        Stitcher::new(Box::new(WavConcat))
            .with_sample_rate(24000)
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap();
        assert_eq!(AudioSample::read_wav(&output).unwrap().sample_rate, 24000);
    }

    #[test]
    fn wav_tool_rejects_segments_at_another_rate() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![segment(dir.path(), 0, 0.5), segment(dir.path(), 1, 0.25)];
        let output = dir.path().join("out.wav");

        let err = Stitcher::new(Box::new(WavConcat))
            .with_sample_rate(16000)
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap_err();
        assert!(matches!(
            err,
            StitchError::SampleRateMismatch {
                found: 24000,
                expected: 16000,
                ..
            }
        ));
        assert!(leftovers(dir.path(), &[]).is_empty());
    }

    #[test]
    fn ffmpeg_concat_copies_unless_resampling() {
        let manifest = Path::new("out.concat.txt");
        let output = Path::new("out.wav");

        let copy = concat_args(manifest, output, None);
        assert!(copy.iter().any(|a| a == "copy"));
        assert!(!copy.iter().any(|a| a == "-ar"));

        let resample = concat_args(manifest, output, Some(16000));
        let at = resample.iter().position(|a| a == "-ar").unwrap();
        assert_eq!(resample[at + 1], "16000");
        assert!(!resample.iter().any(|a| a == "copy"));
        assert_eq!(resample.last().unwrap(), "out.wav");
    }

    #[test]
    fn ffmpeg_resamples_to_the_requested_rate() {
        if Command::new("ffmpeg").arg("-version").output().is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let results = vec![segment(dir.path(), 0, 0.5), segment(dir.path(), 1, 0.25)];
        let output = dir.path().join("out.wav");

        Stitcher::new(Box::new(Ffmpeg::default()))
            .with_sample_rate(16000)
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap();
        assert_eq!(AudioSample::read_wav(&output).unwrap().sample_rate, 16000);
        assert!(leftovers(dir.path(), &["out.wav"]).is_empty());
    }

    #[test]
    fn missing_ffmpeg_is_tool_not_found_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let results = vec![segment(dir.path(), 0, 0.5)];
        let output = dir.path().join("out.wav");

        let err = Stitcher::new(Box::new(Ffmpeg::new("no-such-ffmpeg-binary")))
            .stitch(&results, &output, TempArtifacts::new())
            .unwrap_err();
        assert!(matches!(err, StitchError::ToolNotFound(_)));
        assert!(leftovers(dir.path(), &[]).is_empty());
    }

    #[test]
    fn ffmpeg_concat_and_mp3_transcode() {
        // Skip when ffmpeg is unavailable in the execution environment.
        if Command::new("ffmpeg").arg("-version").output().is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let results = vec![segment(dir.path(), 0, 0.5), segment(dir.path(), 1, 0.25)];
        let output = dir.path().join("out.wav");

        let stitched = Stitcher::new(Box::new(Ffmpeg::default()))
            .with_transcode("mp3", 2)
            .stitch(&results, &output, TempArtifacts::new());
        let Ok(stitched) = stitched else {
            // ffmpeg builds without libmp3lame exist; concat still has to work.
            return;
        };
        assert!(output.is_file());
        assert_eq!(stitched.transcoded, Some(dir.path().join("out.mp3")));
        assert!(dir.path().join("out.mp3").is_file());
        let mut left = leftovers(dir.path(), &["out.wav", "out.mp3"]);
        left.sort();
        assert!(left.is_empty(), "{left:?}");
    }

    #[test]
    fn manifest_quotes_round_trip() {
        let line = manifest_line(Path::new("/tmp/it's here.wav"));
        assert_eq!(line, r"file '/tmp/it'\''s here.wav'");
        assert_eq!(
            parse_manifest(&format!("{line}\n\n")).unwrap(),
            vec![PathBuf::from("/tmp/it's here.wav")]
        );
        assert!(matches!(
            parse_manifest("oops"),
            Err(StitchError::Manifest(_))
        ));
    }

    #[test]
    fn silent_audio_is_not_trimmed_away() {
        let silent = AudioSample::new(vec![0.0; 5], 24000);
        assert_eq!(trim_silence(&silent), silent);

        let padded = AudioSample::new(vec![0.0, 0.0005, 0.2, -0.3, 0.0], 24000);
        assert_eq!(trim_silence(&padded).samples, vec![0.2, -0.3]);
    }

    #[test]
    fn known_formats_map_to_encoders() {
        assert_eq!(encoder_for("MP3"), Some("libmp3lame"));
        assert_eq!(encoder_for("wav"), None);
    }
}
