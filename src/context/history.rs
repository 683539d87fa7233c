use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Speaker of a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Producer-assigned signal carried by a message.
///
/// Anything other than [`MessageTag::Conversation`] marks the message as
/// important: it survives ordinary trimming and may be re-sent after it has
/// left the recent window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTag {
    Conversation,
    FileOpen,
    AutoLoad,
    ProjectContext,
    FileEdit,
}

impl MessageTag {
    #[must_use]
    pub fn is_important(self) -> bool {
        !matches!(self, Self::Conversation)
    }

    /// Recovers the tag of a message whose producer is no longer known.
    ///
    /// Auto-load turns carry plain user text and come back as conversation.
    #[must_use]
    pub fn infer(text: &str) -> Self {
        if text.starts_with("[Opened file:") {
            Self::FileOpen
        } else if text.starts_with("[Loaded project context:") {
            Self::ProjectContext
        } else if text.contains("```file:") {
            Self::FileEdit
        } else {
            Self::Conversation
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    text: String,
    index: u64,
    tag: MessageTag,
    chars: usize,
}

impl Message {
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Insertion order; unique for the lifetime of the history.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[must_use]
    pub fn tag(&self) -> MessageTag {
        self.tag
    }

    #[must_use]
    pub fn chars(&self) -> usize {
        self.chars
    }
}

/// Ordered conversation log bounded by a character budget.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
    next_index: u64,
    total_chars: usize,
    budget_chars: usize,
    window: usize,
}

impl History {
    #[must_use]
    pub fn new(budget_chars: usize, window: usize) -> Self {
        Self {
            messages: Vec::new(),
            next_index: 0,
            total_chars: 0,
            budget_chars,
            window,
        }
    }

    /// Appends a message, then trims back to budget. Returns its index.
    pub fn append(&mut self, role: Role, text: impl Into<String>, tag: MessageTag) -> u64 {
        let text = text.into();
        let index = self.next_index;
        self.next_index += 1;
        let chars = text.chars().count();
        self.total_chars += chars;
        self.messages.push(Message {
            role,
            text,
            index,
            tag,
            chars,
        });
        self.trim();
        index
    }

    /// Evicts until the retained text fits the budget. Returns the number evicted.
    ///
    /// Order of preference: the oldest untagged message outside the recent
    /// window, then the oldest message outside the window, then the oldest
    /// message inside the window (only when the window alone is over budget).
    pub fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.total_chars > self.budget_chars && !self.messages.is_empty() {
            let boundary = self.messages.len().saturating_sub(self.window);
            let victim = self.messages[..boundary]
                .iter()
                .position(|message| !message.tag.is_important())
                .unwrap_or(0);
            if boundary == 0 {
                tracing::debug!(
                    window = self.window,
                    total_chars = self.total_chars,
                    "recent window alone exceeds history budget; evicting oldest"
                );
            }
            let removed = self.messages.remove(victim);
            self.total_chars -= removed.chars;
            evicted += 1;
        }
        evicted
    }

    /// Recent window plus up to `max_older_important` older tagged messages.
    ///
    /// Older messages whose fingerprint repeats one already selected (or one
    /// inside the window) are dropped. Output is chronological.
    #[must_use]
    pub fn select_for_prompt(
        &self,
        max_older_important: usize,
        fingerprint_chars: usize,
    ) -> Vec<&Message> {
        let boundary = self.messages.len().saturating_sub(self.window);
        let (older, recent) = self.messages.split_at(boundary);

        let mut seen: HashSet<[u8; 32]> = recent
            .iter()
            .map(|message| fingerprint(&message.text, fingerprint_chars))
            .collect();

        // Newest-first scan so the cap keeps the latest important events.
        let mut picked: Vec<&Message> = Vec::new();
        for message in older.iter().rev() {
            if picked.len() == max_older_important {
                break;
            }
            if message.tag.is_important()
                && seen.insert(fingerprint(&message.text, fingerprint_chars))
            {
                picked.push(message);
            }
        }
        picked.reverse();

        picked.extend(recent.iter());
        picked
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    #[must_use]
    pub fn budget_chars(&self) -> usize {
        self.budget_chars
    }

    /// Changes the budget and trims to it. Returns the number evicted.
    pub fn set_budget(&mut self, budget_chars: usize) -> usize {
        self.budget_chars = budget_chars;
        self.trim()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_chars = 0;
    }
}

/// SHA-256 of the first `prefix_chars` characters.
#[must_use]
pub fn fingerprint(text: &str, prefix_chars: usize) -> [u8; 32] {
    let end = text
        .char_indices()
        .nth(prefix_chars)
        .map_or(text.len(), |(offset, _)| offset);
    Sha256::digest(&text.as_bytes()[..end]).into()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{fingerprint, History, MessageTag, Role};

    fn texts(history: &History) -> Vec<String> {
        history
            .messages()
            .iter()
            .map(|message| message.text().to_string())
            .collect()
    }

    #[test]
    fn append_assigns_increasing_indices() {
        let mut history = History::new(1_000, 8);
        let first = history.append(Role::User, "a", MessageTag::Conversation);
        let second = history.append(Role::Assistant, "b", MessageTag::Conversation);
        assert!(second > first);
        assert_eq!(history.total_chars(), 2);
    }

    #[test]
    fn trim_prefers_untagged_messages_outside_window() {
        let mut history = History::new(45, 2);
        history.append(Role::User, "Opened file a.rs 0123456", MessageTag::FileOpen);
        history.append(Role::User, "chatter 1", MessageTag::Conversation);
        history.append(Role::Assistant, "chatter 2", MessageTag::Conversation);
        assert_eq!(history.len(), 3);

        // 24 + 9 + 9 + 8 = 50 > 45: the oldest untagged message outside the window goes.
        history.append(Role::User, "recent 1", MessageTag::Conversation);
        assert_eq!(
            texts(&history),
            vec![
                "Opened file a.rs 0123456".to_string(),
                "chatter 2".to_string(),
                "recent 1".to_string()
            ]
        );

        history.append(Role::Assistant, "recent 2", MessageTag::Conversation);
        assert_eq!(
            texts(&history),
            vec![
                "Opened file a.rs 0123456".to_string(),
                "recent 1".to_string(),
                "recent 2".to_string()
            ]
        );
        assert_eq!(history.total_chars(), 40);
    }

    #[test]
    fn trim_falls_back_to_oldest_outside_window_when_all_tagged() {
        let mut history = History::new(30, 1);
        history.append(Role::User, "0123456789", MessageTag::FileOpen);
        history.append(Role::User, "abcdefghij", MessageTag::AutoLoad);
        history.append(Role::User, "ABCDEFGHIJ", MessageTag::FileEdit);
        history.append(Role::User, "tail", MessageTag::Conversation);

        assert_eq!(
            texts(&history),
            vec![
                "abcdefghij".to_string(),
                "ABCDEFGHIJ".to_string(),
                "tail".to_string()
            ]
        );
    }

    #[test]
    fn oversized_window_is_evicted_oldest_first_until_within_budget() {
        let mut history = History::new(10, 8);
        history.append(Role::User, "123456", MessageTag::FileOpen);
        history.append(Role::Assistant, "abcdef", MessageTag::Conversation);
        assert_eq!(texts(&history), vec!["abcdef".to_string()]);

        history.append(Role::User, "this single message is too long", MessageTag::FileEdit);
        assert!(history.is_empty());
        assert_eq!(history.total_chars(), 0);
    }

    #[test]
    fn trim_is_idempotent() {
        let mut history = History::new(50, 3);
        for turn in 0..20 {
            let tag = if turn % 4 == 0 {
                MessageTag::FileOpen
            } else {
                MessageTag::Conversation
            };
            history.append(Role::User, format!("message number {turn}"), tag);
        }
        let before = texts(&history);
        assert_eq!(history.trim(), 0);
        assert_eq!(history.trim(), 0);
        assert_eq!(texts(&history), before);
        assert!(history.total_chars() <= 50);
    }

    #[test]
    fn select_for_prompt_adds_latest_older_important_messages() {
        let mut history = History::new(10_000, 2);
        history.append(Role::User, "Opened file one", MessageTag::FileOpen);
        history.append(Role::User, "Opened file two", MessageTag::FileOpen);
        history.append(Role::User, "small talk", MessageTag::Conversation);
        history.append(Role::User, "Opened file three", MessageTag::FileOpen);
        history.append(Role::User, "recent a", MessageTag::Conversation);
        history.append(Role::Assistant, "recent b", MessageTag::Conversation);

        let selected: Vec<&str> = history
            .select_for_prompt(2, 100)
            .into_iter()
            .map(|message| message.text())
            .collect();
        assert_eq!(
            selected,
            vec!["Opened file two", "Opened file three", "recent a", "recent b"]
        );
    }

    #[test]
    fn select_for_prompt_dedups_by_fingerprint_prefix() {
        let mut history = History::new(10_000, 1);
        history.append(Role::User, "Opened file x.rs: version A", MessageTag::FileOpen);
        history.append(Role::User, "Opened file x.rs: version B", MessageTag::FileOpen);
        history.append(Role::User, "latest", MessageTag::Conversation);

        let selected = history.select_for_prompt(3, 18);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].text(), "Opened file x.rs: version B");
        assert_eq!(selected[1].text(), "latest");
    }

    #[test]
    fn fingerprint_respects_char_boundaries() {
        assert_eq!(fingerprint("héllo world", 2), fingerprint("héllo there", 2));
        assert_ne!(fingerprint("héllo", 2), fingerprint("hallo", 2));
        assert_eq!(fingerprint("ab", 100), fingerprint("ab", 2));
    }

    #[test]
    fn infer_recognizes_producer_markers() {
        assert_eq!(MessageTag::infer("[Opened file: a.py]"), MessageTag::FileOpen);
        assert_eq!(
            MessageTag::infer("[Loaded project context: Cargo.toml]"),
            MessageTag::ProjectContext
        );
        assert_eq!(
            MessageTag::infer("Done.\n```file:a.py\nx = 1\n```"),
            MessageTag::FileEdit
        );
        assert_eq!(MessageTag::infer("what does a.py do?"), MessageTag::Conversation);
    }
}
