//! Message decoder: classifies a sanitized block of server output.
//!
//! Most of what the server prints (seeks, notifications, command output)
//! is noise to us and decodes to `None`. Only channel tells and private
//! tells become structured messages.
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `Handle(flags)...(channel): text`. Flags are ratings or titles such as
/// `(1742)`, `(TD)`, `(*)`; the last parenthesised number is the channel.
static CHANNEL_TELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([a-zA-Z]+)(?:\([A-Z0-9*]+\))*\(([0-9]+)\):\s+(.*)")
        .expect("channel tell pattern is valid")
});

/// `Handle(flags) tells you: text`.
static PRIVATE_TELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([a-zA-Z]+)(?:\([A-Z0-9*]+\))* tells you:\s+(.*)")
        .expect("private tell pattern is valid")
});

/// A chat message addressed to a numbered channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTell {
    pub handle: String,
    pub channel: u32,
    pub text: String,
}

/// A message sent directly to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateTell {
    pub handle: String,
    pub text: String,
}

/// A decoded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ChannelTell(ChannelTell),
    PrivateTell(PrivateTell),
}

/// Decode one sanitized block of output. Anything that isn't a tell is `None`.
pub fn decode(line: &str) -> Option<Message> {
    if let Some(caps) = CHANNEL_TELL.captures(line) {
        // Out-of-range channel numbers are not real tells.
        let channel = caps[2].parse().ok()?;
        return Some(Message::ChannelTell(ChannelTell {
            handle: caps[1].to_owned(),
            channel,
            text: clean_text(&caps[3]),
        }));
    }
    if let Some(caps) = PRIVATE_TELL.captures(line) {
        return Some(Message::PrivateTell(PrivateTell {
            handle: caps[1].to_owned(),
            text: clean_text(&caps[2]),
        }));
    }
    None
}

/// Long tells are wrapped by the server; join them back and drop any
/// trailing control characters.
fn clean_text(raw: &str) -> String {
    raw.replace('\n', "")
        .trim_end_matches(|c: char| c.is_control())
        .to_owned()
}

impl ChannelTell {
    /// One line of the broadcast log: `HH:MM:SS(channel) handle: text\n`.
    pub fn log_line(&self, time: impl fmt::Display) -> String {
        format!("{time}({}) {}: {}\n", self.channel, self.handle, self.text)
    }
}

impl fmt::Display for ChannelTell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): {}", self.handle, self.channel, self.text)
    }
}
