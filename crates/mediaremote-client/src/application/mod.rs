//! Application layer: use cases built on the domain types and the transport
//! seam. Infrastructure implementations are injected at construction time,
//! keeping every use case unit-testable.

pub mod connection;
pub mod controller;
pub mod pairing;
