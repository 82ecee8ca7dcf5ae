//! Integration tests for the progressive catalog loader
//!
//! The loader, status registry and recovery engine are wired together with a
//! scripted backend (see `common::mocks`); the HTTP suite drives the real
//! reqwest backend against a mockito server.

mod http_end_to_end;
mod merge_validation;
mod monitoring;
mod recovery_flow;
mod scenarios;
