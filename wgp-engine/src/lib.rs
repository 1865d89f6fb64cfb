//! Workgroup protocol engine.
//!
//! A [`Participant`] speaks the workgroup protocol with its counterparties:
//! signed [`envelope::ProtocolEnvelope`]s travel over a [`Transport`], are
//! queued by the [`inbound`] server and routed by the dispatch state machine
//! in [`dispatch`]. Workflow states are committed to the shield contract's
//! commitment log through [`commit_mgr::JsonRpcCommitLog`], and every
//! "wait until the other side catches up" goes through [`poller`].

pub mod availability;
pub mod commit_mgr;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod envelope;
mod error;
pub mod inbound;
pub mod keys;
pub mod participant;
pub mod payload;
pub mod poller;
pub mod state;
pub mod transport;

pub use availability::{AvailabilityProvider, AvailabilityRecord, CalendarAvailability};
pub use commit_mgr::JsonRpcCommitLog;
pub use config::ParticipantConfig;
pub use directory::{OrganizationDirectory, OrganizationRecord, StaticDirectory};
pub use dispatch::{DefaultHooks, DispatchOutcome, ProtocolHooks};
pub use envelope::{Opcode, PayloadType, ProtocolEnvelope};
pub use error::EngineError;
pub use inbound::{inbound_router, serve_inbound, AuthorizedTokens, InboundState, Subscription};
pub use keys::{KeyCustody, LocalKeyCustody};
pub use participant::{Collaborators, CommitReceipt, Participant, WorkgroupInvite};
pub use poller::{await_condition, PollConfig, PollError};
pub use state::{CounterSnapshot, EngineState, LocalCommitment};
pub use transport::{HttpTransport, MemoryTransport, Transport};
