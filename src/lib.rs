//! `maildrop-smtpd`: a single-threaded, reactor-driven SMTP receiving
//! server with maildrop storage, an external transform worker pool, and a
//! UDP control-plane, per `spec.md`.
//!
//! The reactor loop, connection state machine, transform dispatcher, and
//! control-plane codec are the core (`reactor`, `connection`, `smtp`,
//! `transform`, `control`); `config`, `net`, `maildrop`, and `metrics` are
//! the supporting cast each of those leans on.

pub mod config;
pub mod connection;
pub mod control;
pub mod maildrop;
pub mod metrics;
pub mod net;
pub mod reactor;
pub mod smtp;
pub mod transform;

pub use config::Config;
pub use smtp::server::Server;
