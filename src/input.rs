//! Input loading: tagged text files and dialog tables.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::config::DatasetConfig;
use crate::error::PipelineError;
use crate::tags::{self, Origin, Utterance, DEFAULT_EMOTION, DEFAULT_SPEAKER};

/// One row of a dialog table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DialogRow {
    #[serde(alias = "Dialog", default)]
    pub dialog: Option<Ident>,
    #[serde(alias = "Turn", default)]
    pub turn: Option<Ident>,
    #[serde(alias = "Speaker", default)]
    pub speaker: Option<String>,
    #[serde(alias = "Emotion", default)]
    pub emotion: Option<String>,
    #[serde(alias = "Translated_Sentence", alias = "Sentence")]
    pub text: String,
}

/// Dialog and turn ids show up both as numbers and as strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Ident {
    Int(i64),
    Str(String),
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ident::Int(n) => write!(f, "{n}"),
            Ident::Str(s) => f.write_str(s),
        }
    }
}

/// Load whichever source the dataset section names.
pub fn load_utterances(dataset: &DatasetConfig) -> Result<Vec<Utterance>, PipelineError> {
    let utterances = match (&dataset.text_path, &dataset.dialog_data_path) {
        (Some(path), _) => tags::parse_lines(load_text_lines(path)?),
        (None, Some(path)) => utterances_from_rows(load_dialog_rows(path)?),
        (None, None) => {
            return Err(PipelineError::Input("no input source configured".to_string()))
        }
    };
    if utterances.is_empty() {
        return Err(PipelineError::Input("input contains no text to synthesize".to_string()));
    }
    log::info!("Loaded {} utterances", utterances.len());
    Ok(utterances)
}

pub fn load_text_lines(path: &Path) -> Result<Vec<String>, PipelineError> {
    let content = read_input(path)?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Read rows from a JSON array (`.json`) or one object per line (`.jsonl`).
pub fn load_dialog_rows(path: &Path) -> Result<Vec<DialogRow>, PipelineError> {
    log::info!("Loading dialog data from: {}", path.display());
    let content = read_input(path)?;
    let bad = |e: serde_json::Error, line: Option<usize>| {
        let at = line.map(|n| format!(" line {n}")).unwrap_or_default();
        PipelineError::Input(format!("{}{at}: {e}", path.display()))
    };

    if content.trim_start().starts_with('[') {
        return serde_json::from_str(&content).map_err(|e| bad(e, None));
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).map_err(|e| bad(e, Some(n + 1))))
        .collect()
}

/// Turn dialog rows into utterances.
///
/// Row columns win over an inline tag; the tag only fills what the row lacks
/// and is always stripped from the text.
pub fn utterances_from_rows<I>(rows: I) -> Vec<Utterance>
where
    I: IntoIterator<Item = DialogRow>,
{
    rows.into_iter()
        .filter_map(|row| {
            let parsed = tags::parse(&row.text);
            if parsed.is_blank() {
                return None;
            }
            let tag = parsed.tag.as_ref();
            let speaker = non_empty(row.speaker)
                .or_else(|| tag.map(|t| t.speaker.clone()))
                .unwrap_or_else(|| DEFAULT_SPEAKER.to_string());
            let emotion = non_empty(row.emotion)
                .or_else(|| tag.and_then(|t| t.emotion.clone()))
                .unwrap_or_else(|| DEFAULT_EMOTION.to_string());
            let origin = match (row.dialog, row.turn) {
                (None, None) => None,
                (dialog, turn) => Some(Origin {
                    dialog: dialog.map(|d| d.to_string()).unwrap_or_default(),
                    turn: turn.map(|t| t.to_string()).unwrap_or_default(),
                }),
            };
            Some((speaker, emotion, parsed.text, origin))
        })
        .enumerate()
        .map(|(index, (speaker, emotion, text, origin))| Utterance {
            index,
            speaker,
            emotion,
            text,
            origin,
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_input(path: &Path) -> Result<String, PipelineError> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::Input(format!("Input file not found: {}", path.display()))
        } else {
            PipelineError::Input(format!("cannot read {}: {e}", path.display()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_jsonl_rows_with_original_column_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogs.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"Dialog": 7, "Turn": 1, "Speaker": "A", "Translated_Sentence": "Oi!"}"#,
                "\n\n",
                r#"{"dialog": "d8", "turn": "2", "speaker": "B", "emotion": "sad", "text": "Tchau."}"#,
                "\n"
            ),
        )
        .unwrap();

        let rows = load_dialog_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].dialog, Some(Ident::Int(7)));
        assert_eq!(rows[1].emotion.as_deref(), Some("sad"));

        let utterances = utterances_from_rows(rows);
        assert_eq!(utterances[0].speaker, "A");
        assert_eq!(utterances[0].emotion, "neutral");
        assert_eq!(
            utterances[0].origin,
            Some(Origin {
                dialog: "7".into(),
                turn: "1".into()
            })
        );
        assert_eq!(utterances[1].index, 1);
        assert_eq!(utterances[1].text, "Tchau.");
    }

    #[test]
    fn reads_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogs.json");
        std::fs::write(&path, r#"[{"Speaker": "A", "text": "um"}, {"text": "dois"}]"#).unwrap();

        let utterances = utterances_from_rows(load_dialog_rows(&path).unwrap());
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[1].speaker, DEFAULT_SPEAKER);
        assert_eq!(utterances[1].origin, None);
    }

    #[test]
    fn row_columns_override_inline_tag_but_tag_is_stripped() {
        let rows = vec![
            DialogRow {
                dialog: None,
                turn: None,
                speaker: Some("Row".into()),
                emotion: None,
                text: "[speaker:Tag, emotion:angry] Hey".into(),
            },
            DialogRow {
                dialog: None,
                turn: None,
                speaker: Some("  ".into()),
                emotion: None,
                text: "   ".into(),
            },
            DialogRow {
                dialog: None,
                turn: None,
                speaker: None,
                emotion: None,
                text: "[speaker:Tag, emotion:angry] Again".into(),
            },
        ];
        let utterances = utterances_from_rows(rows);
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].speaker, "Row");
        assert_eq!(utterances[0].emotion, "angry");
        assert_eq!(utterances[0].text, "Hey");
        assert_eq!(utterances[1].index, 1);
        assert_eq!(utterances[1].speaker, "Tag");
    }

    #[test]
    fn missing_or_empty_input_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = DatasetConfig {
            text_path: Some(dir.path().join("nope.txt")),
            ..Default::default()
        };
        assert!(matches!(
            load_utterances(&missing),
            Err(PipelineError::Input(_))
        ));

        let blank = dir.path().join("blank.txt");
        std::fs::write(&blank, "\n   \n[speaker:A, emotion:sad]\n").unwrap();
        let empty = DatasetConfig {
            text_path: Some(blank),
            ..Default::default()
        };
        assert!(matches!(load_utterances(&empty), Err(PipelineError::Input(_))));
    }

    #[test]
    fn malformed_jsonl_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"text\": \"ok\"}\n{oops}\n").unwrap();
        match load_dialog_rows(&path) {
            Err(PipelineError::Input(msg)) => assert!(msg.contains("line 2"), "{msg}"),
            other => panic!("expected input error, got {other:?}"),
        }
    }
}
