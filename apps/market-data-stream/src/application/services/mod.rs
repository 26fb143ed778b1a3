//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamController`: caller API and session lifecycle
//! - `FeedSession`: per-category forward/drain loop against the feed port
//! - `FeedState`: per-category connection health

mod controller;
mod feed_state;
mod session;

pub use controller::{
    ControllerConfig, ControllerError, ControllerState, ControllerStatus, StreamController,
};
pub use feed_state::{ConnectionState, FeedHealth, FeedState};
pub use session::{FeedSession, SessionContext};
