//! Mention and tag scanner.
//!
//! Splits free-form text into plain-text runs and `@mention` / `#tag` links so
//! that renderers never have to re-parse user input. The scanner is a small
//! state machine fed one character at a time, followed by an end-of-input
//! sentinel that flushes whatever token is still being accumulated.
//!
//! Every segment borrows from the input, and concatenating
//! [`Segment::literal`] over the whole sequence gives back the input exactly.
//!
//! ```
//! use buzzer::tokenizer::{tokenize, LinkKind, Segment};
//!
//! let segments: Vec<_> = tokenize("Hi @tom & @jerry!").collect();
//! assert_eq!(segments.len(), 5);
//! assert!(matches!(segments[1], Segment::Link(token) if token.kind() == LinkKind::Mention));
//! ```

use std::{fmt, str::CharIndices};

use crate::client::Search;

const MENTION_MARKER: char = '@';
const TAG_MARKER: char = '#';

/// What a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// `@username`
    Mention,
    /// `#topic`
    Tag,
}

impl LinkKind {
    fn from_marker(marker: char) -> Option<Self> {
        match marker {
            MENTION_MARKER => Some(Self::Mention),
            TAG_MARKER => Some(Self::Tag),
            _ => None,
        }
    }

    /// The character that introduces this kind of link.
    pub fn marker(self) -> char {
        match self {
            Self::Mention => MENTION_MARKER,
            Self::Tag => TAG_MARKER,
        }
    }
}

/// A classified `@mention` or `#tag`, marker included in its literal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    kind: LinkKind,
    literal: &'a str,
}

impl<'a> Token<'a> {
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// The label without its marker, e.g. `tom` for `@tom`.
    pub fn label(&self) -> &'a str {
        // Markers are ASCII, so the label always starts at byte 1.
        &self.literal[1..]
    }

    /// The text exactly as it appeared in the input, e.g. `@tom`.
    pub fn literal(&self) -> &'a str {
        self.literal
    }

    /// The search a click on this link should issue.
    pub fn search(&self) -> Search {
        match self.kind {
            LinkKind::Mention => Search::Profile(self.label().to_string()),
            LinkKind::Tag => Search::Topic(self.label().to_string()),
        }
    }
}

/// One piece of scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Link(Token<'a>),
}

impl<'a> Segment<'a> {
    /// The input text this segment covers.
    pub fn literal(&self) -> &'a str {
        match self {
            Segment::Text(text) => *text,
            Segment::Link(token) => token.literal(),
        }
    }
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Text(text) => write!(f, "text {text:?}"),
            Segment::Link(token) => match token.kind() {
                LinkKind::Mention => write!(f, "mention {:?}", token.label()),
                LinkKind::Tag => write!(f, "tag {:?}", token.label()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between tokens; a marker here starts a link.
    Ready,
    /// Accumulating a link label; `start` is the byte offset of the marker.
    Accumulating { kind: LinkKind, start: usize },
    /// Inside an ordinary word, where a marker cannot start a link.
    Within,
}

/// Iterator over the [`Segment`]s of one input string.
///
/// Created by [`tokenize`]. The sequence is finite and cannot be restarted.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    input: &'a str,
    chars: CharIndices<'a>,
    state: State,
    /// Start of the plain-text run that has not been emitted yet.
    text_start: usize,
    queued: Option<Segment<'a>>,
    finished: bool,
}

/// Scan `input` into text and link segments.
pub fn tokenize(input: &str) -> Segments<'_> {
    Segments {
        input,
        chars: input.char_indices(),
        state: State::Ready,
        text_start: 0,
        queued: None,
        finished: false,
    }
}

/// Labels of every `@mention` in `input`, in order of appearance.
pub fn mentions(input: &str) -> Vec<&str> {
    labels(input, LinkKind::Mention)
}

/// Labels of every `#tag` in `input`, in order of appearance.
pub fn tags(input: &str) -> Vec<&str> {
    labels(input, LinkKind::Tag)
}

fn labels(input: &str, kind: LinkKind) -> Vec<&str> {
    tokenize(input)
        .filter_map(|segment| match segment {
            Segment::Link(token) if token.kind() == kind => Some(token.label()),
            _ => None,
        })
        .collect()
}

/// Word characters continue a word or a link label.
fn is_word(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

impl<'a> Segments<'a> {
    /// Advance the machine by one character; `None` is the end sentinel.
    fn step(&mut self, pos: usize, ch: Option<char>) -> Option<Segment<'a>> {
        match self.state {
            State::Ready => {
                self.enter_ready(pos, ch);
                None
            }
            State::Within => {
                match ch {
                    Some(c) if is_word(c) => {}
                    _ => self.state = State::Ready,
                }
                None
            }
            State::Accumulating { kind, start } => {
                if matches!(ch, Some(c) if is_word(c)) {
                    return None;
                }

                let emitted = if pos > start + kind.marker().len_utf8() {
                    let text = self.take_text(start);
                    let link = Segment::Link(Token {
                        kind,
                        literal: &self.input[start..pos],
                    });
                    self.text_start = pos;
                    match text {
                        Some(text) => {
                            self.queued = Some(link);
                            Some(text)
                        }
                        None => Some(link),
                    }
                } else {
                    // A bare marker stays part of the surrounding text.
                    None
                };

                // Re-read the terminating character from READY, except that a
                // marker glued to the previous token is treated as word text.
                match ch {
                    Some(c) if LinkKind::from_marker(c).is_some() => self.state = State::Within,
                    _ => self.enter_ready(pos, ch),
                }

                emitted
            }
        }
    }

    fn enter_ready(&mut self, pos: usize, ch: Option<char>) {
        self.state = match ch {
            Some(c) => match LinkKind::from_marker(c) {
                Some(kind) => State::Accumulating { kind, start: pos },
                None if is_word(c) => State::Within,
                None => State::Ready,
            },
            None => State::Ready,
        };
    }

    fn take_text(&mut self, end: usize) -> Option<Segment<'a>> {
        if end <= self.text_start {
            return None;
        }
        let text = &self.input[self.text_start..end];
        self.text_start = end;
        Some(Segment::Text(text))
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(segment) = self.queued.take() {
            return Some(segment);
        }

        while !self.finished {
            let (pos, ch) = match self.chars.next() {
                Some((pos, ch)) => (pos, Some(ch)),
                None => {
                    self.finished = true;
                    (self.input.len(), None)
                }
            };

            if let Some(segment) = self.step(pos, ch) {
                return Some(segment);
            }
        }

        self.take_text(self.input.len())
    }
}

impl std::iter::FusedIterator for Segments<'_> {}
