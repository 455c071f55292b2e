//! Shared configuration types and parsing for the `satellite` and
//! `orchestrator` binaries.

pub mod config;
