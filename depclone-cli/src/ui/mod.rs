//! Terminal rendering of fetch events.
//!
//! Status lines go to stderr so that `-o -` can stream the archive to stdout.

mod progress;

pub use progress::DownloadBar;

use console::{style, StyledObject, Term};
use depclone::{ProgressEvent, Severity};

use crate::error::CliError;

/// Marker printed in front of a status line.
pub fn severity_marker(severity: Severity) -> StyledObject<&'static str> {
    match severity {
        Severity::Info => style("·").dim(),
        Severity::Success => style("✓").green(),
        Severity::Warning => style("!").yellow().bold(),
        Severity::Error => style("✗").red().bold(),
    }
}

/// One rendered status line.
pub fn status_line(message: &str, severity: Severity) -> String {
    let text = match severity {
        Severity::Info => style(message).dim(),
        Severity::Success => style(message),
        Severity::Warning => style(message).yellow(),
        Severity::Error => style(message).red(),
    };
    format!("{} {}", severity_marker(severity), text)
}

pub fn print_error(error: &CliError) {
    let _ = Term::stderr().write_line(&format!("{} {}", style("error:").red().bold(), error));
}

/// Renders the event stream of one fetch.
pub struct EventRenderer {
    term: Term,
    bar: DownloadBar,
    quiet: bool,
    warnings: usize,
    errors: usize,
}

impl EventRenderer {
    /// `quiet` hides informational lines; warnings and errors always show.
    pub fn new(quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            bar: DownloadBar::new(),
            quiet,
            warnings: 0,
            errors: 0,
        }
    }

    /// Render a progress or status event. Terminal events are left to the
    /// caller.
    pub fn render(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Progress { percentage } => self.bar.update(*percentage),
            ProgressEvent::Status { message, severity } => {
                match severity {
                    Severity::Warning => self.warnings += 1,
                    Severity::Error => self.errors += 1,
                    Severity::Info if self.quiet => return,
                    _ => {}
                }
                self.bar.suspend(|| {
                    let _ = self.term.write_line(&status_line(message, *severity));
                });
            }
            ProgressEvent::FatalError { .. } | ProgressEvent::Complete { .. } => {
                self.bar.clear();
            }
        }
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn println(&self, line: &str) {
        let _ = self.term.write_line(line);
    }
}
