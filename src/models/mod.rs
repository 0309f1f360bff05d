//! models/mod.rs
//! Entidades compartidas entre el dispatcher y el servicio de tracking.

pub mod campaign_model;
pub mod recipient_model;
pub mod sequence_model;
pub mod tracking_model;
