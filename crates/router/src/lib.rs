//! Weir Router - per-application envelope fan-out
//!
//! A single router task owns the registry of active sinks and services five
//! input channels: primary envelopes from ingress, synthetic error
//! envelopes from syslog sinks, sink open/close requests, and dump-playback
//! requests. Being the registry's only writer makes the transactional
//! parts of routing - drain reconciliation, lazy dump creation - trivially
//! serial; a read-write lock covers only the per-kind counters so metric
//! emission can run concurrently.

mod grouped;
mod router;

pub use grouped::GroupedSinks;
pub use router::{
    DumpRequest, MessageRouter, RouterHandle, RouterInstrumentation, SinkCounts,
    NEW_SUBSCRIBER_REPLAY_LIMIT,
};
