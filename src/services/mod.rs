//! services/mod.rs
//! Capas de negocio: lock, selección, secuencia, composición, envío y tracking.

pub mod composer_service;
pub mod dispatch_service;
pub mod eligibility_service;
pub mod email_service;
pub mod lock_service;
pub mod scheduler_service;
pub mod sequence_service;
pub mod tracking_service;
