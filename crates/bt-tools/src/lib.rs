//! Tooling primitives for the behavior-tree engine.
//!
//! Nothing here depends on the engine. The tree component pushes [`TraceEvent`]s into
//! whatever [`TraceSink`] its owner installed, and tooling renders them later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod trace;

pub use trace::{NullTraceSink, SharedTraceSink, TraceEvent, TraceLog, TraceSink, VecTraceSink};
