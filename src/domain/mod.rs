//! Domain layer: entities, their state-transition rules, and the ports the
//! application layer depends on.

pub mod credits;
pub mod payment;
pub mod plans;
pub mod ports;
pub mod project;
pub mod signature;
