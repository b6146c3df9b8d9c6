//! Transcript Parser
//!
//! Extracts an ordered conversation from rendered template text. Segments are
//! delimited by `<role~>…</role~>` markers for the roles `system`, `user` and
//! `assistant`. Matching is case-sensitive, spans lines and is non-greedy.
//!
//! ```
//! use skein_core::transcript::{Role, Transcript};
//!
//! let transcript = Transcript::parse("<system~>You are a bot</system~><user~>Hi</user~>");
//! assert_eq!(transcript.len(), 2);
//! assert_eq!(transcript.messages()[0].role(), Role::System);
//! assert_eq!(transcript.messages()[1].content(), "Hi");
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SkeinError};

lazy_static! {
    // No backreferences in `regex`; one alternative per role keeps the
    // leftmost-first, non-greedy semantics of a `<(role)~>(.*?)</\1~>` scan.
    static ref SEGMENT: Regex = Regex::new(
        r"(?s)<system~>(.*?)</system~>|<user~>(.*?)</user~>|<assistant~>(.*?)</assistant~>"
    )
    .expect("segment pattern is valid");

    static ref MARKER: Regex =
        Regex::new(r"</?[A-Za-z_][A-Za-z0-9_-]*~>").expect("marker pattern is valid");
}

/// Conversation role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Role token as used in markers and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    // Capture group order in `SEGMENT`
    const BY_GROUP: [Role; 3] = [Role::System, Role::User, Role::Assistant];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single role-tagged message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// How the parser treats marker-shaped text that is not part of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsePolicy {
    /// Skip unmatched, unknown and nested markers silently
    #[default]
    Lenient,
    /// Fail on the first marker that does not open or close a segment
    Strict,
}

/// Ordered sequence of messages; order is conversation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse with the lenient policy. Never fails.
    pub fn parse(text: &str) -> Self {
        let (transcript, _) = Self::scan(text);
        transcript
    }

    /// Parse with an explicit policy.
    pub fn parse_with(text: &str, policy: ParsePolicy) -> Result<Self> {
        let (transcript, consumed) = Self::scan(text);

        if policy == ParsePolicy::Strict {
            for marker in MARKER.find_iter(text) {
                if consumed.binary_search(&marker.start()).is_err() {
                    return Err(SkeinError::Transcript {
                        offset: marker.start(),
                        marker: marker.as_str().to_string(),
                    });
                }
            }
        }

        Ok(transcript)
    }

    /// Returns the transcript plus the sorted start offsets of every marker
    /// that opened or closed a matched segment.
    fn scan(text: &str) -> (Self, Vec<usize>) {
        let mut messages = Vec::new();
        let mut consumed = Vec::new();

        for caps in SEGMENT.captures_iter(text) {
            let Some((group, content)) = caps
                .iter()
                .skip(1)
                .enumerate()
                .find_map(|(i, m)| m.map(|m| (i, m)))
            else {
                continue;
            };
            let role = Role::BY_GROUP[group];
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);

            consumed.push(whole.start);
            // closing marker is `</role~>`
            consumed.push(whole.end - (role.as_str().len() + 4));

            messages.push(Message::new(role, content.as_str()));
        }

        (Self { messages }, consumed)
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.push(Message::system(content));
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
