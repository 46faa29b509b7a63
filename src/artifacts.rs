//! Per-run file naming and temporary file cleanup.

use std::path::{Path, PathBuf};

use crate::tags::Utterance;

/// Where a run writes its intermediate files: next to the final output,
/// prefixed with the output's file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
    stem: String,
}

impl Workspace {
    pub fn for_output(output: &Path) -> Self {
        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        Self { dir, stem }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<stem>_<index>_<label>.wav`; the zero-padded index keeps names unique
    /// and sortable, the label keeps them traceable.
    pub fn segment_path(&self, utterance: &Utterance) -> PathBuf {
        let label = match &utterance.origin {
            Some(origin) => format!(
                "dialog_{}_turn_{}_{}",
                origin.dialog, origin.turn, utterance.speaker
            ),
            None => utterance.speaker.clone(),
        };
        self.dir.join(format!(
            "{}_{:05}_{}.wav",
            self.stem,
            utterance.index,
            sanitize(&label)
        ))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}.concat.txt", self.stem))
    }

    pub fn trimmed_path(segment: &Path) -> PathBuf {
        segment.with_extension("trimmed.wav")
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Files that must not outlive the run. Every registered path is removed
/// when the guard is dropped, whichever way the run ends.
#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every registered file now. Returns how many were deleted.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove temporary file {}: {e}", path.display()),
            }
        }
        if removed > 0 {
            log::debug!("Removed {removed} temporary files");
        }
        removed
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::Origin;

    fn utterance(index: usize, speaker: &str, origin: Option<Origin>) -> Utterance {
        Utterance {
            index,
            speaker: speaker.to_string(),
            emotion: "neutral".to_string(),
            text: "x".to_string(),
            origin,
        }
    }

    #[test]
    fn segment_names_embed_index_and_origin() {
        let ws = Workspace::for_output(Path::new("out/final.wav"));
        assert_eq!(
            ws.segment_path(&utterance(3, "Dr. Who", None)),
            PathBuf::from("out/final_00003_Dr__Who.wav")
        );
        let origin = Origin {
            dialog: "12".into(),
            turn: "4".into(),
        };
        assert_eq!(
            ws.segment_path(&utterance(0, "A", Some(origin))),
            PathBuf::from("out/final_00000_dialog_12_turn_4_A.wav")
        );
        assert_eq!(ws.manifest_path(), PathBuf::from("out/final.concat.txt"));
        assert_eq!(
            Workspace::trimmed_path(Path::new("out/final_00000_A.wav")),
            PathBuf::from("out/final_00000_A.trimmed.wav")
        );
    }

    #[test]
    fn bare_file_name_uses_current_dir() {
        let ws = Workspace::for_output(Path::new("final.wav"));
        assert_eq!(ws.dir(), Path::new("."));
    }

    #[test]
    fn drop_removes_registered_files_and_ignores_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        {
            let mut artifacts = TempArtifacts::new();
            artifacts.register(&a);
            artifacts.register(&a);
            artifacts.register(&b);
            artifacts.register(dir.path().join("never_written.wav"));
            assert_eq!(artifacts.paths().len(), 3);
        }

        assert!(!a.exists());
        assert!(!b.exists());
    }
}
