//! # Claude Windows
//!
//! Reconstructs the provider's rolling quota windows from Claude Code usage
//! logs and reports usage, burn rate and projections per window.
//!
//! ## Overview
//!
//! Events are read from JSONL transcripts and merged into one timeline.
//! Several detection strategies then propose candidate windows:
//! - limit notifications carrying an explicit reset time
//! - windows remembered in the persistent history
//! - continuous activity, idle gaps and first messages
//!
//! A selector keeps a non-overlapping, fixed-length set of windows, which
//! are materialized into sessions with token and cost totals.
//!
//! ## Features
//!
//! - `colors` (default): Enables terminal color output via owo-colors

/// Double-buffered event snapshot shared between readers and a refresher
pub mod cache;

/// Command-line argument parsing
pub mod cli;

/// Detector tunables and environment overrides
pub mod config;

/// SQLite cache of per-session detection results
pub mod db;

/// End-to-end detection pipeline
pub mod detector;

/// Display formatting for text and JSON output
pub mod display;

/// Persistent window history store
pub mod history;

/// Transcript ingestion
pub mod ingest;

/// Limit notification parsing
pub mod limits;

/// Tracing subscriber setup
pub mod logging;

/// Burn rate and projections
pub mod metrics;

/// Data models for events, signals, candidates, records and sessions
pub mod models;

/// Model-specific pricing calculations
pub mod pricing;

/// Non-overlapping window selection
pub mod selector;

/// Session materialization from selected windows
pub mod sessions;

/// Window detection strategies
pub mod strategies;

/// Event timeline construction and deduplication
pub mod timeline;

/// Utility functions for paths, formatting, and time
pub mod utils;
