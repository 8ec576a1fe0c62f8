//! Streaming call tree renderer.
//!
//! Each function entry starts a new line indented by the current call depth. Consecutive
//! entries of the same function are collapsed into the first line, which gets a
//! `(total: N times)` suffix once a different function is entered or the trace ends.

use std::io::{self, Write};

use tracing::debug;

/// Indent written once per level of call depth.
pub const INDENT: &str = "  ";

/// A resolved trace event, as consumed by the [`Printer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Call<'a> {
    Enter(&'a str),
    Exit,
}

pub struct Printer<W: Write> {
    out: W,
    indent: String,
    depth: usize,
    last: Option<String>,
    repeats: usize,
    started: bool,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W) -> Self {
        Self::with_indent(out, INDENT)
    }

    pub fn with_indent(out: W, indent: impl Into<String>) -> Self {
        Self {
            out,
            indent: indent.into(),
            depth: 0,
            last: None,
            repeats: 0,
            started: false,
        }
    }

    /// Current call depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn handle(&mut self, call: Call<'_>) -> io::Result<()> {
        match call {
            Call::Enter(name) => self.enter(name)?,
            Call::Exit => self.exit(),
        }

        Ok(())
    }

    fn enter(&mut self, name: &str) -> io::Result<()> {
        if self.last.as_deref() == Some(name) {
            self.repeats += 1;
        } else {
            self.flush_repeats()?;

            if self.started {
                self.out.write_all(b"\n")?;
            }
            for _ in 0..self.depth {
                self.out.write_all(self.indent.as_bytes())?;
            }
            self.out.write_all(name.as_bytes())?;

            self.started = true;
            self.repeats = 0;
            self.last = Some(name.to_owned());
        }

        self.depth += 1;

        Ok(())
    }

    fn exit(&mut self) {
        match self.depth.checked_sub(1) {
            Some(depth) => self.depth = depth,
            None => debug!("exit without matching enter, depth stays at 0"),
        }
    }

    fn flush_repeats(&mut self) -> io::Result<()> {
        if self.repeats > 0 {
            write!(self.out, " (total: {} times)", self.repeats + 1)?;
            self.repeats = 0;
        }

        Ok(())
    }

    /// Write `message` on a line of its own, ending any pending run of repeats.
    pub fn note(&mut self, message: &str) -> io::Result<()> {
        self.flush_repeats()?;

        if self.started {
            self.out.write_all(b"\n")?;
        }
        self.out.write_all(message.as_bytes())?;

        // The next entry starts a fresh line, even for the same function.
        self.started = true;
        self.last = None;

        self.out.flush()
    }

    /// Flush any pending repeat count and end the last line.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_repeats()?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
