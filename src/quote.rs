//! Selection quoting
//!
//! Selected reply text is wrapped in snippet markers and staged in the
//! pending input. The message list is never touched here.

pub const SNIPPET_BEGIN: &str = "-----BEGIN SNIPPET-----";
pub const SNIPPET_END: &str = "-----END SNIPPET-----";

const ATTRIBUTION: &str = "Assistant wrote:";

/// Quote block for a selection, or `None` when the selection is blank and
/// the quote action should stay hidden.
pub fn quote_selection(selected: &str) -> Option<String> {
    if selected.trim().is_empty() {
        return None;
    }
    Some(format!(
        "{}\n{}\n{}\n{}\n",
        ATTRIBUTION, SNIPPET_BEGIN, selected, SNIPPET_END
    ))
}

/// Text staged for the next outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputBuffer {
    text: String,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn paste(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Hand the staged text to the send path and leave the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}
