//! Assistant reply streaming: transport collaborator and assembler.

pub mod assembler;
pub mod transport;

pub use assembler::{FragmentOutcome, StreamAssembler, StreamState};
pub use transport::{
    ChatTransport, Completion, CompletionRequest, ExchangeContext, Fragment, StreamTransport,
    TransportError,
};
