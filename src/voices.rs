//! Reference voice selection.
//!
//! Two modes:
//! - **Explicit**: a [`VoiceMap`] from `(speaker, emotion)` or `speaker` to a
//!   corpus id, fixed at construction.
//! - **Round-robin**: distinct speakers are sorted and the `k`-th speaker gets
//!   corpus entry `k mod len(corpus)`.
//!
//! Either way a speaker keeps the same voice for the lifetime of the
//! resolver, and every corpus clip is read at most once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::corpus::ReferenceCorpus;
use crate::error::ReferenceError;
use crate::tags::Utterance;
use crate::AudioSample;

/// A resolved reference voice.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceReference {
    pub speaker: String,
    /// `None` when the voice was chosen for the speaker regardless of emotion.
    pub emotion: Option<String>,
    pub reference_id: String,
    pub audio: Arc<AudioSample>,
    pub transcript: String,
}

type VoiceKey = (String, Option<String>);

/// Immutable `(speaker, emotion) -> reference id` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceMap {
    entries: HashMap<VoiceKey, String>,
}

impl VoiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a speaker, optionally restricted to one emotion, to a corpus id.
    pub fn with(
        mut self,
        speaker: impl Into<String>,
        emotion: Option<&str>,
        reference_id: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            (speaker.into(), emotion.map(str::to_string)),
            reference_id.into(),
        );
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact `(speaker, emotion)` first, then the speaker-only entry.
    fn lookup(&self, speaker: &str, emotion: &str) -> Option<(VoiceKey, &str)> {
        let exact = (speaker.to_string(), Some(emotion.to_string()));
        if let Some(id) = self.entries.get(&exact) {
            return Some((exact, id));
        }
        let any = (speaker.to_string(), None);
        self.entries.get(&any).map(|id| (any, id.as_str()))
    }
}

#[derive(Debug)]
enum Assignment {
    Explicit(VoiceMap),
    RoundRobin {
        assigned: BTreeMap<String, String>,
        corpus_empty: bool,
    },
}

pub struct VoiceResolver {
    corpus: Box<dyn ReferenceCorpus>,
    assignment: Assignment,
    voices: HashMap<VoiceKey, Arc<VoiceReference>>,
    clips: HashMap<String, (Arc<AudioSample>, String)>,
}

impl VoiceResolver {
    pub fn explicit(corpus: Box<dyn ReferenceCorpus>, map: VoiceMap) -> Self {
        log::info!("Explicit voice map with {} entries", map.len());
        Self {
            corpus,
            assignment: Assignment::Explicit(map),
            voices: HashMap::new(),
            clips: HashMap::new(),
        }
    }

    /// Assign every distinct speaker a corpus entry up front.
    pub fn round_robin<I, S>(corpus: Box<dyn ReferenceCorpus>, speakers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = corpus.ids();
        let speakers: BTreeSet<String> = speakers
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();

        let assigned: BTreeMap<String, String> = if ids.is_empty() {
            log::warn!("Reference corpus is empty; no speaker can be voiced");
            BTreeMap::new()
        } else {
            speakers
                .iter()
                .enumerate()
                .map(|(ordinal, speaker)| (speaker.clone(), ids[ordinal % ids.len()].clone()))
                .collect()
        };

        for (speaker, id) in &assigned {
            log::info!("Assigned reference '{id}' to speaker '{speaker}'");
        }

        Self {
            corpus,
            assignment: Assignment::RoundRobin {
                assigned,
                corpus_empty: ids.is_empty(),
            },
            voices: HashMap::new(),
            clips: HashMap::new(),
        }
    }

    /// Round-robin over all speakers in `utterances`.
    pub fn round_robin_for(corpus: Box<dyn ReferenceCorpus>, utterances: &[Utterance]) -> Self {
        Self::round_robin(corpus, utterances.iter().map(|u| u.speaker.as_str()))
    }

    /// The corpus id a speaker was given in round-robin mode.
    pub fn assignment(&self, speaker: &str) -> Option<&str> {
        match &self.assignment {
            Assignment::RoundRobin { assigned, .. } => assigned.get(speaker).map(String::as_str),
            Assignment::Explicit(_) => None,
        }
    }

    pub fn resolve(&mut self, utterance: &Utterance) -> Result<Arc<VoiceReference>, ReferenceError> {
        let (key, id) = self.select(&utterance.speaker, &utterance.emotion)?;
        if let Some(voice) = self.voices.get(&key) {
            return Ok(Arc::clone(voice));
        }

        let (audio, transcript) = self.clip(&id)?;
        let voice = Arc::new(VoiceReference {
            speaker: key.0.clone(),
            emotion: key.1.clone(),
            reference_id: id,
            audio,
            transcript,
        });
        self.voices.insert(key, Arc::clone(&voice));
        Ok(voice)
    }

    fn select(&self, speaker: &str, emotion: &str) -> Result<(VoiceKey, String), ReferenceError> {
        match &self.assignment {
            Assignment::Explicit(map) => map
                .lookup(speaker, emotion)
                .map(|(key, id)| (key, id.to_string()))
                .ok_or_else(|| ReferenceError::Unmapped {
                    speaker: speaker.to_string(),
                    emotion: emotion.to_string(),
                }),
            Assignment::RoundRobin { corpus_empty: true, .. } => Err(ReferenceError::EmptyCorpus {
                speaker: speaker.to_string(),
            }),
            Assignment::RoundRobin { assigned, .. } => assigned
                .get(speaker)
                .map(|id| ((speaker.to_string(), None), id.clone()))
                .ok_or_else(|| ReferenceError::Unmapped {
                    speaker: speaker.to_string(),
                    emotion: emotion.to_string(),
                }),
        }
    }

    fn clip(&mut self, id: &str) -> Result<(Arc<AudioSample>, String), ReferenceError> {
        if let Some((audio, transcript)) = self.clips.get(id) {
            return Ok((Arc::clone(audio), transcript.clone()));
        }

        let record = self
            .corpus
            .load(id)
            .map_err(|source| ReferenceError::Unreadable {
                id: id.to_string(),
                source,
            })?
            .ok_or_else(|| ReferenceError::Missing { id: id.to_string() })?;

        if record.audio.samples.is_empty() {
            return Err(ReferenceError::Missing { id: id.to_string() });
        }

        log::debug!(
            "Loaded reference '{id}' ({:.2}s @ {}Hz)",
            record.audio.duration_secs(),
            record.audio.sample_rate
        );
        let audio = Arc::new(record.audio);
        self.clips
            .insert(id.to_string(), (Arc::clone(&audio), record.transcript.clone()));
        Ok((audio, record.transcript))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::corpus::{MemoryCorpus, ReferenceRecord};
    use crate::error::CorpusError;
    use crate::tags::parse_lines;

    fn record(id: &str) -> ReferenceRecord {
        ReferenceRecord {
            id: id.to_string(),
            audio: AudioSample::new(vec![0.5; 8], 24000),
            transcript: format!("transcript of {id}"),
        }
    }

    fn corpus(ids: &[&str]) -> Box<dyn ReferenceCorpus> {
        Box::new(MemoryCorpus::new(ids.iter().map(|id| record(id)).collect()))
    }

    /// Counts loads so caching can be observed.
    struct CountingCorpus {
        inner: MemoryCorpus,
        loads: Rc<Cell<usize>>,
    }

    impl ReferenceCorpus for CountingCorpus {
        fn ids(&self) -> Vec<String> {
            self.inner.ids()
        }

        fn load(&self, id: &str) -> Result<Option<ReferenceRecord>, CorpusError> {
            self.loads.set(self.loads.get() + 1);
            self.inner.load(id)
        }
    }

    #[test]
    fn round_robin_uses_sorted_speaker_order() {
        let resolver = VoiceResolver::round_robin(corpus(&["r0", "r1"]), ["C", "A", "B", "A"]);
        assert_eq!(resolver.assignment("A"), Some("r0"));
        assert_eq!(resolver.assignment("B"), Some("r1"));
        assert_eq!(resolver.assignment("C"), Some("r0"));
    }

    #[test]
    fn round_robin_with_empty_corpus_fails_every_speaker() {
        let utterances = parse_lines(["[speaker:A, emotion:happy] hi"]);
        let mut resolver = VoiceResolver::round_robin_for(corpus(&[]), &utterances);
        assert!(matches!(
            resolver.resolve(&utterances[0]),
            Err(ReferenceError::EmptyCorpus { .. })
        ));
    }

    #[test]
    fn same_speaker_gets_same_voice_and_clip_loads_once() {
        let loads = Rc::new(Cell::new(0));
        let corpus = CountingCorpus {
            inner: MemoryCorpus::new(vec![record("r0")]),
            loads: Rc::clone(&loads),
        };
        let utterances = parse_lines([
            "[speaker:A, emotion:happy] one",
            "[speaker:B, emotion:sad] two",
            "[speaker:A, emotion:sad] three",
        ]);
        let mut resolver = VoiceResolver::round_robin_for(Box::new(corpus), &utterances);

        let first = resolver.resolve(&utterances[0]).unwrap();
        let third = resolver.resolve(&utterances[2]).unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(first.transcript, "transcript of r0");
        assert_eq!(first.emotion, None);

        // B shares clip r0 with A; still one corpus read.
        let second = resolver.resolve(&utterances[1]).unwrap();
        assert_eq!(second.reference_id, "r0");
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn explicit_prefers_emotion_then_falls_back_to_speaker() {
        let map = VoiceMap::new()
            .with("speaker1", Some("happy"), "happy_clip")
            .with("speaker1", None, "plain_clip");
        let mut resolver =
            VoiceResolver::explicit(corpus(&["happy_clip", "plain_clip"]), map);
        let utterances = parse_lines([
            "[speaker:speaker1, emotion:happy] yay",
            "[speaker:speaker1, emotion:angry] grr",
        ]);

        let happy = resolver.resolve(&utterances[0]).unwrap();
        assert_eq!(happy.reference_id, "happy_clip");
        assert_eq!(happy.emotion.as_deref(), Some("happy"));

        let angry = resolver.resolve(&utterances[1]).unwrap();
        assert_eq!(angry.reference_id, "plain_clip");
        assert_eq!(angry.emotion, None);
    }

    #[test]
    fn explicit_miss_and_dangling_id_are_reference_errors() {
        let map = VoiceMap::new().with("Bob", Some("sad"), "gone");
        let mut resolver = VoiceResolver::explicit(corpus(&["other"]), map);
        let utterances = parse_lines(["[speaker:Bob, emotion:sad] a", "[speaker:Eve, emotion:sad] b"]);

        assert!(matches!(
            resolver.resolve(&utterances[0]),
            Err(ReferenceError::Missing { id }) if id == "gone"
        ));
        assert!(matches!(
            resolver.resolve(&utterances[1]),
            Err(ReferenceError::Unmapped { speaker, .. }) if speaker == "Eve"
        ));
    }
}
