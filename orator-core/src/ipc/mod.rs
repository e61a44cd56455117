//! Event types serialised for out-of-process consumers.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so they can
//! be forwarded verbatim over whatever transport the embedding binary
//! publishes on (TCP JSON lines in `orator-cli`).

pub mod events;
