//! tubescale-queue — the queue side of the autoscaler.
//!
//! Talks to beanstalkd over its text protocol and turns the per-tube
//! `stats-tube` documents into [`TubeStats`] values. The [`Collector`]
//! enumerates tubes once per tick and then fetches stats lazily, one tube
//! at a time, so a single broken tube never blocks the rest of the pass.
//!
//! # Architecture
//!
//! ```text
//! Collector<Q: QueueBackend>
//!   ├── list_tubes()        (failure aborts the tick)
//!   └── StatsPass::next()   (per-tube fetch + decode, failures skipped)
//!
//! BeanstalkClient: QueueBackend
//!   └── BufStream<TcpStream> (lazy reconnect after transport errors)
//! ```

pub mod client;
pub mod collector;
pub mod error;
pub mod stats;

pub use client::{BeanstalkClient, BoxFuture, QueueBackend, validate_tube_name};
pub use collector::{Collector, StatsPass};
pub use error::{QueueError, QueueResult};
pub use stats::TubeStats;
