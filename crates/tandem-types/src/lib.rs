//! Shared message types for tandem.
//!
//! Both execution contexts (the worker that owns canonical state and the
//! foreground that mirrors it) speak only in [`Action`] envelopes. This crate
//! holds that envelope, the reserved envelope types, the structural
//! [`Patch`] protocol used to propagate state, and the [`EnvelopeSink`] seam
//! used to hand envelopes across a boundary. It has no internal tandem
//! dependencies.
//!
//! # Key Types
//!
//! |-----------------|------------------------------------------------|
//! | Type            | Purpose                                        |
//! |-----------------|------------------------------------------------|
//! | [`Action`]      | Validated `{type, payload, error, meta}`       |
//! | [`Patch`]       | Ordered add/replace/remove operations          |
//! | [`PatchOp`]     | One pointer-addressed operation                |
//! | [`EnvelopeSink`]| Non-blocking one-way delivery                  |
//! |-----------------|------------------------------------------------|

pub mod action;
pub mod patch;
pub mod sink;

pub use action::{
    types, Action, EnvelopeError, RequestPhase, META_GENERATION, META_ORIGINATOR,
    ORIGINATOR_WORKER,
};
pub use patch::{apply, diff, Patch, PatchError, PatchOp};
pub use sink::{EnvelopeSink, SinkClosed};
