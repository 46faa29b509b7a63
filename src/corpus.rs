//! Reference voice corpora.
//!
//! A corpus is an enumerable set of `(id, audio, transcript)` records. The
//! voice resolver only ever asks for the ordered id list and for single
//! records by id, so implementations can load audio lazily.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::CorpusError;
use crate::AudioSample;

/// One reference voice: audio plus what is said in it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRecord {
    pub id: String,
    pub audio: AudioSample,
    pub transcript: String,
}

pub trait ReferenceCorpus {
    /// All record ids, in an order that is stable across runs.
    fn ids(&self) -> Vec<String>;

    /// Load a single record. `Ok(None)` means the id is unknown.
    fn load(&self, id: &str) -> Result<Option<ReferenceRecord>, CorpusError>;

    /// Iterate every record in id order.
    fn records(&self) -> Box<dyn Iterator<Item = Result<ReferenceRecord, CorpusError>> + '_> {
        Box::new(
            self.ids()
                .into_iter()
                .filter_map(move |id| self.load(&id).transpose()),
        )
    }
}

/// A directory of `*.wav` reference clips with optional `<stem>.txt`
/// transcripts next to them.
///
/// ```text
/// refs/
/// ├── leni_0001.wav
/// ├── leni_0001.txt    # "Bom dia a todos."
/// └── leni_0002.wav    # no transcript: empty string
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    clips: BTreeMap<String, PathBuf>,
}

impl DirectoryCorpus {
    pub fn open(root: &Path) -> Result<Self, CorpusError> {
        let mut clips = BTreeMap::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            let is_wav = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
            if !is_wav || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                clips.insert(stem.to_string(), path.clone());
            }
        }

        log::info!(
            "Found {} reference clips in {}",
            clips.len(),
            root.display()
        );
        Ok(Self { clips })
    }
}

impl ReferenceCorpus for DirectoryCorpus {
    fn ids(&self) -> Vec<String> {
        self.clips.keys().cloned().collect()
    }

    fn load(&self, id: &str) -> Result<Option<ReferenceRecord>, CorpusError> {
        let Some(wav_path) = self.clips.get(id) else {
            return Ok(None);
        };
        let audio = AudioSample::read_wav(wav_path)?;

        let transcript_path = wav_path.with_extension("txt");
        let transcript = match std::fs::read_to_string(&transcript_path) {
            Ok(text) => text.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No transcript for reference '{id}', using empty text");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(ReferenceRecord {
            id: id.to_string(),
            audio,
            transcript,
        }))
    }
}

/// Records held in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryCorpus {
    records: Vec<ReferenceRecord>,
}

impl MemoryCorpus {
    pub fn new(records: Vec<ReferenceRecord>) -> Self {
        Self { records }
    }
}

impl ReferenceCorpus for MemoryCorpus {
    fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    fn load(&self, id: &str) -> Result<Option<ReferenceRecord>, CorpusError> {
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }
}
