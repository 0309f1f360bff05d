//! tests/mod.rs
//! Pruebas del motor sobre una SQLite temporal migrada.

mod support;
