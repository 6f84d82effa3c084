//! Security module for toolpilot
//!
//! The model is an untrusted caller. Anything it asks a tool to touch on
//! disk goes through the workspace sandbox first.
//!
//! # Containment
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Tool call: edit_or_create(target_file = "../secrets.txt")      │
//! │                                                                 │
//! │  ToolExecutor ──path args──► Workspace::resolve                 │
//! │                                   │                             │
//! │                    inside root? ──┼── yes ─► tool runs          │
//! │                                   └── no ──► ERROR_UNSAFE_PATH  │
//! │                                              (no I/O at all)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod sandbox;

pub use sandbox::{resolve, SandboxError, Workspace};
