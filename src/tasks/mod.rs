//! Background Tasks Module
//!
//! Contains the tasks a table runs off the caller's thread.
//!
//! # Tasks
//! - Expiration timer: one-shot wait for the next deadline, then a sweep

mod expiration;

pub use expiration::spawn_expiration_timer;
