//! config/mod.rs
//! Configuración global leída del entorno (.env incluido).

pub mod app_config;
