//! handlers/mod.rs
//! Endpoints HTTP del servicio de tracking.
pub mod tracking_handler;
