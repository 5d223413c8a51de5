//! feedbus - broker-mediated message feed.
//!
//! Messages posted over HTTP travel a two-hop pipeline:
//!
//! ```text
//! POST /api/messages -> ingest topic -> worker (persist, republish)
//!     -> processed topic -> feed bridge -> broadcaster -> GET /api/feed
//! ```
//!
//! Each hop commits its read position only after the record is handled, so a
//! failure anywhere leads to redelivery rather than loss. Viewers receive
//! stored history before live events.

pub mod api;
pub mod app;
pub mod broadcast;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod feed;
pub mod message;
pub mod simulator;
pub mod storage;
pub mod utils;
pub mod worker;

pub use app::{AppError, Application};
pub use envelope::{Envelope, EnvelopeError, Eventable};
pub use message::Message;
