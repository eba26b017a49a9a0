//! Stream assembler
//!
//! Folds transport fragments into the trailing assistant message. The
//! terminal bookkeeping runs exactly once per exchange, whether the exchange
//! ends normally, with an error or through cancellation.

use super::transport::Fragment;
use crate::messages::{MessageList, MessageType, Role};
use crate::{ParleyError, Result};
use tracing::{debug, error, info, warn};

/// Per-exchange stream flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub is_first_message: bool,
    pub is_stream_ended: bool,
    pub is_response_complete: bool,
    pub last_completed_message_id: Option<u64>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            is_first_message: true,
            is_stream_ended: false,
            is_response_complete: false,
            last_completed_message_id: None,
        }
    }
}

/// What a fragment did to the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// A new assistant message was started after the user's message.
    Appended(u64),
    /// The trailing assistant message grew.
    Extended(u64),
    /// The list was empty and a minimal assistant message was synthesized.
    Recovered(u64),
    /// Terminal bookkeeping ran.
    Completed,
    /// Nothing changed.
    Ignored,
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    state: StreamState,
    loading: bool,
    in_exchange: bool,
    anomalies: usize,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn in_exchange(&self) -> bool {
        self.in_exchange
    }

    /// Number of fragments that arrived on an empty list.
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    /// Claim the single exchange slot and reset the per-exchange flags.
    pub fn begin_exchange(&mut self) -> Result<()> {
        if self.in_exchange {
            return Err(ParleyError::ExchangeInProgress);
        }
        self.in_exchange = true;
        self.loading = true;
        self.state.is_stream_ended = false;
        self.state.is_response_complete = false;
        debug!("Exchange started (first: {})", self.state.is_first_message);
        Ok(())
    }

    pub fn handle_fragment(&mut self, messages: &mut MessageList, fragment: Fragment) -> FragmentOutcome {
        if fragment.is_terminal {
            return if self.finish(messages, true) {
                FragmentOutcome::Completed
            } else {
                FragmentOutcome::Ignored
            };
        }

        if self.state.is_stream_ended {
            warn!("Dropping fragment received after end of stream");
            return FragmentOutcome::Ignored;
        }

        debug!("Fragment: {:?}", fragment.content);

        match messages.last().map(|m| m.role) {
            None => {
                self.anomalies += 1;
                error!(
                    "Message list empty while streaming (occurrence {})",
                    self.anomalies
                );
                let id = messages.append_streamed(fragment.content, fragment.attachments);
                FragmentOutcome::Recovered(id)
            }
            Some(Role::User) => {
                let id = messages.append_streamed(fragment.content, fragment.attachments);
                FragmentOutcome::Appended(id)
            }
            Some(Role::Assistant) => {
                let content = fragment.content;
                messages
                    .update_last(|last| {
                        last.content.push_str(&content);
                        FragmentOutcome::Extended(last.id)
                    })
                    .unwrap_or(FragmentOutcome::Ignored)
            }
            Some(Role::System) => {
                error!("Unexpected trailing system message while streaming");
                FragmentOutcome::Ignored
            }
        }
    }

    /// Terminal bookkeeping. Returns `false` when the stream had already
    /// ended, in which case nothing changes.
    ///
    /// `record_completion` controls whether a trailing assistant message is
    /// published as the last completed reply.
    pub fn finish(&mut self, messages: &MessageList, record_completion: bool) -> bool {
        if self.state.is_stream_ended {
            return false;
        }

        self.state.is_stream_ended = true;
        self.state.is_response_complete = true;
        self.loading = false;

        if record_completion {
            if let Some(last) = messages.last().filter(|m| m.role == Role::Assistant) {
                self.state.last_completed_message_id = Some(last.id);
            }
        }

        info!(
            "Response complete (last completed: {:?})",
            self.state.last_completed_message_id
        );
        true
    }

    /// Surface a classified transport failure as an error reply.
    pub fn fail_with_client_error(&mut self, messages: &mut MessageList, reason: &str) -> u64 {
        self.loading = false;
        messages.append(Role::Assistant, MessageType::Error, reason, Vec::new())
    }

    /// Release the exchange slot.
    pub fn end_exchange(&mut self) {
        self.loading = false;
        self.state.is_first_message = false;
        self.in_exchange = false;
    }

    /// Forget everything, as for a fresh conversation.
    pub fn reset(&mut self) {
        self.state = StreamState::default();
        self.loading = false;
        self.in_exchange = false;
    }

    /// Forget the last completed reply (e.g. after switching conversations).
    pub fn clear_completion(&mut self) {
        self.state.last_completed_message_id = None;
        self.state.is_response_complete = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_with_user(content: &str) -> MessageList {
        let mut messages = MessageList::new();
        messages.append(Role::User, MessageType::Normal, content, vec![]);
        messages
    }

    #[test]
    fn test_fragments_concatenate_in_order() {
        let mut assembler = StreamAssembler::new();
        let mut messages = list_with_user("Hi");
        assembler.begin_exchange().unwrap();

        assert_eq!(
            assembler.handle_fragment(&mut messages, Fragment::content("Hel")),
            FragmentOutcome::Appended(2)
        );
        assert_eq!(
            assembler.handle_fragment(&mut messages, Fragment::content("lo")),
            FragmentOutcome::Extended(2)
        );
        assert_eq!(
            assembler.handle_fragment(&mut messages, Fragment::terminal()),
            FragmentOutcome::Completed
        );

        let last = messages.last().unwrap();
        assert_eq!(last.content, "Hello");
        assert!(last.is_newly_streamed);
        assert!(!assembler.is_loading());
        assert!(assembler.state().is_response_complete);
        assert_eq!(assembler.state().last_completed_message_id, Some(2));
    }

    #[test]
    fn test_terminal_is_idempotent() {
        let mut assembler = StreamAssembler::new();
        let mut messages = list_with_user("Hi");
        assembler.begin_exchange().unwrap();
        assembler.handle_fragment(&mut messages, Fragment::content("Done."));

        assembler.handle_fragment(&mut messages, Fragment::terminal());
        let once = assembler.state().clone();
        let snapshot = messages.clone();

        assert_eq!(
            assembler.handle_fragment(&mut messages, Fragment::terminal()),
            FragmentOutcome::Ignored
        );
        assert_eq!(assembler.state(), &once);
        assert_eq!(messages, snapshot);
    }

    #[test]
    fn test_empty_list_recovers_with_assistant_message() {
        let mut assembler = StreamAssembler::new();
        let mut messages = MessageList::new();
        assembler.begin_exchange().unwrap();

        let outcome = assembler.handle_fragment(&mut messages, Fragment::content("orphan"));
        assert_eq!(outcome, FragmentOutcome::Recovered(1));
        assert_eq!(messages.last().unwrap().role, Role::Assistant);
        assert_eq!(assembler.anomalies(), 1);
    }

    #[test]
    fn test_late_fragment_is_ignored() {
        let mut assembler = StreamAssembler::new();
        let mut messages = list_with_user("Hi");
        assembler.begin_exchange().unwrap();
        assembler.handle_fragment(&mut messages, Fragment::content("A"));
        assembler.handle_fragment(&mut messages, Fragment::terminal());

        assert_eq!(
            assembler.handle_fragment(&mut messages, Fragment::content("B")),
            FragmentOutcome::Ignored
        );
        assert_eq!(messages.last().unwrap().content, "A");
    }

    #[test]
    fn test_single_flight_guard() {
        let mut assembler = StreamAssembler::new();
        assembler.begin_exchange().unwrap();
        assert!(matches!(
            assembler.begin_exchange(),
            Err(ParleyError::ExchangeInProgress)
        ));

        assembler.end_exchange();
        assert!(!assembler.state().is_first_message);
        assert!(assembler.begin_exchange().is_ok());
        assert!(!assembler.state().is_stream_ended);
        assert!(!assembler.state().is_response_complete);
    }

    #[test]
    fn test_completion_not_recorded_for_user_tail() {
        let mut assembler = StreamAssembler::new();
        let messages = list_with_user("Hi");
        assembler.begin_exchange().unwrap();

        assert!(assembler.finish(&messages, true));
        assert_eq!(assembler.state().last_completed_message_id, None);
        assert!(assembler.state().is_response_complete);
    }

    #[test]
    fn test_client_error_appends_error_message() {
        let mut assembler = StreamAssembler::new();
        let mut messages = list_with_user("Hi");
        assembler.begin_exchange().unwrap();

        let id = assembler.fail_with_client_error(&mut messages, "Quota exceeded");
        let last = messages.last().unwrap();
        assert_eq!(last.id, id);
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.message_type, MessageType::Error);
        assert_eq!(last.content, "Quota exceeded");
        assert!(!assembler.is_loading());
    }
}
