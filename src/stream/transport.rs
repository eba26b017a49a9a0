//! Chat transport collaborator
//!
//! A transport turns one completion request into an ordered sequence of
//! [`Fragment`]s followed by exactly one terminal fragment. Fragments are
//! pushed into a bounded channel so the consumer applies them in order.

use crate::messages::{FileRef, Message};
use crate::settings::ChatSettings;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One incremental piece of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub content: String,
    pub attachments: Vec<FileRef>,
    pub is_terminal: bool,
}

impl Fragment {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
            is_terminal: false,
        }
    }

    pub fn terminal() -> Self {
        Self {
            content: String::new(),
            attachments: Vec::new(),
            is_terminal: true,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<FileRef>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Per-exchange data for downstream prompt construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeContext {
    pub is_first_message: bool,
    pub user_name: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub settings: ChatSettings,
    /// System prompt first, then the history selected for this exchange.
    pub messages: Vec<Message>,
    pub context: ExchangeContext,
}

/// Final result of a completed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// A known failure class (quota, validation, ...) with a readable reason.
    #[error("{0}")]
    Client(String),

    #[error("Exchange cancelled")]
    Cancelled,

    #[error("Unexpected transport failure: {0}")]
    Unexpected(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Stream one completion.
    ///
    /// Sends zero or more content fragments, then one terminal fragment on
    /// success. Must stop emitting once `cancel` fires.
    async fn stream_completion(
        &self,
        request: CompletionRequest,
        fragments: mpsc::Sender<Fragment>,
        cancel: CancellationToken,
    ) -> Result<Completion, TransportError>;
}

type OpenStream =
    dyn Fn(CompletionRequest) -> BoxStream<'static, Result<String, TransportError>> + Send + Sync;

/// Adapts any stream of content pieces into a [`ChatTransport`].
pub struct StreamTransport {
    open: Box<OpenStream>,
}

impl StreamTransport {
    pub fn new<F>(open: F) -> Self
    where
        F: Fn(CompletionRequest) -> BoxStream<'static, Result<String, TransportError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            open: Box::new(open),
        }
    }

    /// Transport replying with the same pieces to every request.
    pub fn scripted<I, S>(pieces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pieces: Vec<String> = pieces.into_iter().map(Into::into).collect();
        Self::new(move |_request| {
            let pieces = pieces.clone();
            async_stream::stream! {
                for piece in pieces {
                    yield Ok(piece);
                }
            }
            .boxed()
        })
    }
}

#[async_trait]
impl ChatTransport for StreamTransport {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
        fragments: mpsc::Sender<Fragment>,
        cancel: CancellationToken,
    ) -> Result<Completion, TransportError> {
        let mut stream = (self.open)(request);
        let mut content = String::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Transport observed cancellation");
                    return Err(TransportError::Cancelled);
                }
                next = stream.next() => match next {
                    Some(Ok(piece)) => {
                        content.push_str(&piece);
                        if fragments.send(Fragment::content(piece)).await.is_err() {
                            if cancel.is_cancelled() {
                                return Err(TransportError::Cancelled);
                            }
                            warn!("Fragment consumer went away mid-stream");
                            return Err(TransportError::Unexpected(
                                "fragment consumer closed".into(),
                            ));
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }

        // Receiver may already be gone after a cancellation race
        let _ = fragments.send(Fragment::terminal()).await;
        Ok(Completion { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            settings: ChatSettings::fallback("model"),
            messages: vec![],
            context: ExchangeContext::default(),
        }
    }

    #[tokio::test]
    async fn test_scripted_emits_pieces_then_terminal() {
        let transport = StreamTransport::scripted(["Hel", "lo"]);
        let (tx, mut rx) = mpsc::channel(8);

        let completion = transport
            .stream_completion(request(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(completion.content, "Hello");

        let mut received = Vec::new();
        while let Some(fragment) = rx.recv().await {
            received.push(fragment);
        }
        assert_eq!(
            received,
            vec![
                Fragment::content("Hel"),
                Fragment::content("lo"),
                Fragment::terminal()
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_stream() {
        let transport = StreamTransport::new(|_| futures::stream::pending().boxed());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport.stream_completion(request(), tx, cancel).await;
        assert_eq!(result, Err(TransportError::Cancelled));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_is_returned() {
        let transport = StreamTransport::new(|_| {
            async_stream::stream! {
                yield Ok("partial".to_string());
                yield Err(TransportError::Client("Quota exceeded".into()));
            }
            .boxed()
        });
        let (tx, mut rx) = mpsc::channel(8);

        let result = transport
            .stream_completion(request(), tx, CancellationToken::new())
            .await;
        assert_eq!(result, Err(TransportError::Client("Quota exceeded".into())));
        assert_eq!(rx.recv().await, Some(Fragment::content("partial")));
        assert!(rx.recv().await.is_none());
    }
}
