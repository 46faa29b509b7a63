//! Speaker/emotion tag parsing.
//!
//! A line may start with a tag of the form
//!
//! ```text
//! [speaker:<ident>, emotion:<ident>]
//! ```
//!
//! where `<ident>` is any non-empty run of characters other than `[`, `]`
//! and `,`, trimmed of surrounding whitespace. The `emotion` field may be
//! omitted (`[speaker:Bob]`). When no tag is present the speaker defaults to
//! [`DEFAULT_SPEAKER`] and the emotion to [`DEFAULT_EMOTION`]. A bracket that
//! does not follow this grammar is ordinary text.

use std::fmt;

pub const DEFAULT_SPEAKER: &str = "speaker1";
pub const DEFAULT_EMOTION: &str = "neutral";

/// Dialog/turn identifiers of an utterance read from a dialog table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub dialog: String,
    pub turn: String,
}

/// One line of input, ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Zero-based position among the non-blank input lines.
    pub index: usize,
    pub speaker: String,
    pub emotion: String,
    /// Generation text with the tag stripped.
    pub text: String,
    pub origin: Option<Origin>,
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} [{} / {}] {:?}",
            self.index, self.speaker, self.emotion, self.text
        )
    }
}

/// The contents of a recognised tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub speaker: String,
    pub emotion: Option<String>,
}

/// Result of parsing a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub tag: Option<Tag>,
    pub text: String,
}

impl ParsedLine {
    pub fn speaker(&self) -> &str {
        self.tag
            .as_ref()
            .map(|t| t.speaker.as_str())
            .unwrap_or(DEFAULT_SPEAKER)
    }

    pub fn emotion(&self) -> &str {
        self.tag
            .as_ref()
            .and_then(|t| t.emotion.as_deref())
            .unwrap_or(DEFAULT_EMOTION)
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

/// Parse one raw line. Pure; never fails.
pub fn parse(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    match scan_tag(trimmed) {
        Some((tag, rest)) => ParsedLine {
            tag: Some(tag),
            text: rest.trim().to_string(),
        },
        None => ParsedLine {
            tag: None,
            text: trimmed.to_string(),
        },
    }
}

/// Parse every line, dropping blank ones before assigning dense indices.
pub fn parse_lines<I, S>(lines: I) -> Vec<Utterance>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|line| parse(line.as_ref()))
        .filter(|parsed| !parsed.is_blank())
        .enumerate()
        .map(|(index, parsed)| Utterance {
            index,
            speaker: parsed.speaker().to_string(),
            emotion: parsed.emotion().to_string(),
            text: parsed.text,
            origin: None,
        })
        .collect()
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, ch: char) -> Option<()> {
        self.skip_ws();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            Some(())
        } else {
            None
        }
    }

    fn keyword(&mut self, word: &str) -> Option<()> {
        self.skip_ws();
        if self.rest().starts_with(word) {
            self.pos += word.len();
            Some(())
        } else {
            None
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let end = rest
            .find(|c| matches!(c, '[' | ']' | ','))
            .unwrap_or(rest.len());
        let ident = rest[..end].trim();
        if ident.is_empty() {
            return None;
        }
        self.pos += end;
        Some(ident)
    }
}

/// Recognise a tag at the very start of `line`, returning it and the text
/// that follows the closing bracket.
fn scan_tag(line: &str) -> Option<(Tag, &str)> {
    let mut sc = Scanner::new(line);
    if !line.starts_with('[') {
        return None;
    }
    sc.eat('[')?;
    sc.keyword("speaker")?;
    sc.eat(':')?;
    let speaker = sc.ident()?;

    let emotion = if sc.eat(',').is_some() {
        sc.keyword("emotion")?;
        sc.eat(':')?;
        Some(sc.ident()?)
    } else {
        None
    };
    sc.eat(']')?;

    Some((
        Tag {
            speaker: speaker.to_string(),
            emotion: emotion.map(str::to_string),
        },
        sc.rest(),
    ))
}
