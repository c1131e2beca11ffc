//! Replay of queued server writes.

pub mod collaborator;
pub mod dispatcher;
pub mod http;

pub use collaborator::{
    Collaborators, CredentialSource, NetworkCollaborator, OutboundRequest, SendFailure,
    StaticCredentials,
};
pub use dispatcher::{DispatcherState, DrainOutcome, DrainReport, SyncDispatcher};
pub use http::HttpCollaborator;
