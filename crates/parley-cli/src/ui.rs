//! Line-oriented rendering of session events

use crossterm::style::{Stylize, style};
use parley_session::{SessionEvent, StreamOutcome};
use std::io::{self, Write};

/// Writes streamed replies as they arrive
pub struct Printer<W: Write> {
    out: W,
    color: bool,
    /// Whether any answer text was written for the current stream
    streamed: bool,
    /// Whether the cursor is mid-line after answer text
    mid_line: bool,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            streamed: false,
            mid_line: false,
        }
    }

    /// Reset per-stream state before a new send
    pub fn begin(&mut self) {
        self.streamed = false;
        self.mid_line = false;
    }

    pub fn streamed_answer(&self) -> bool {
        self.streamed
    }

    pub fn handle(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::ReasoningStep { step } => {
                self.end_line()?;
                for line in step.lines() {
                    self.dim(&format!("  · {}", line))?;
                }
            }
            SessionEvent::AnswerDelta { delta } => {
                write!(self.out, "{}", delta)?;
                self.out.flush()?;
                self.streamed = true;
                self.mid_line = !delta.ends_with('\n');
            }
            SessionEvent::StreamFinished { outcome } => {
                self.end_line()?;
                match outcome {
                    StreamOutcome::Completed => {}
                    StreamOutcome::Cancelled => self.dim("[stopped]")?,
                    StreamOutcome::Failed { message } => {
                        writeln!(self.out, "Error: {}", message)?;
                        self.dim("Type /retry to send it again.")?;
                    }
                }
            }
            SessionEvent::ConfigSaveFailed { message, .. } => {
                self.end_line()?;
                writeln!(self.out, "Warning: settings not saved: {}", message)?;
            }
            _ => {}
        }
        self.out.flush()
    }

    /// Print a full line (used for sentinel content when nothing streamed)
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        self.end_line()?;
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        Ok(())
    }

    fn dim(&mut self, text: &str) -> io::Result<()> {
        if self.color {
            writeln!(self.out, "{}", style(text).dim())
        } else {
            writeln!(self.out, "{}", text)
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
