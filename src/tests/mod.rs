//! tests/mod.rs
//! Pruebas del nucleo de monitoreo.

mod support;

mod lifecycle_tests;
