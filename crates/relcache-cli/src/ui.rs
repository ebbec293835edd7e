//! Terminal output.
//!
//! Status lines go to stderr so stdout carries only results (paths, keys,
//! release URLs) and stays pipeable.

use crossterm::style::Stylize;

/// Handle for status output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    /// Prints an informational message.
    pub fn info(&self, msg: &str) {
        eprintln!("{} {msg}", "•".blue());
    }

    /// Prints a success message.
    pub fn success(&self, msg: &str) {
        eprintln!("{} {msg}", "✓".green());
    }

    /// Prints a warning.
    pub fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "!".yellow());
    }

    /// Prints a result to stdout.
    pub fn result(&self, value: &str) {
        println!("{value}");
    }
}
