//! SMTP protocol handling: the command state machine, VRFY lookups, and the
//! reactor-driven connection engine.

pub mod parser;
pub mod server;
pub mod vrfy;
