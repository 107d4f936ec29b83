//! Viewport actions: the vocabulary shared by the desktop window, the CLI
//! and tests.
//!
//! # Invariants
//! - The editor consumes actions, never raw window events.
//! - Every key chord maps to at most one action.

pub mod action;
pub mod binding;

pub use action::{Action, ToolMode};
pub use binding::{BindingError, BindingTable, Bindings, Key, KeyChord, Modifiers};
