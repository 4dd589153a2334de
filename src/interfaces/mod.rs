//! Inbound surfaces: endpoint handlers and CSV exports.

pub mod api;
pub mod csv;
