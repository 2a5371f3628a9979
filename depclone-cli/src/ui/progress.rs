//! Percentage bar for large payload downloads.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos:>3}%";

const BAR_CHARS: &str = "█▓▒░  ";

/// Shown while a download reports `Progress` events, hidden otherwise.
///
/// Providers only report progress for payloads above the threshold, so most
/// modules never show a bar at all.
pub struct DownloadBar {
    bar: Option<ProgressBar>,
}

impl DownloadBar {
    pub fn new() -> Self {
        Self { bar: None }
    }

    /// Move the bar to `percentage`, creating it on the first update.
    /// Reaching 100 finishes and hides it.
    pub fn update(&mut self, percentage: f64) {
        let position = percentage.clamp(0.0, 100.0).round() as u64;
        let bar = self.bar.get_or_insert_with(new_bar);
        bar.set_position(position);
        if position >= 100 {
            self.clear();
        }
    }

    /// Run `f` with the bar hidden so printed lines do not tear it.
    pub fn suspend<F: FnOnce()>(&self, f: F) {
        match &self.bar {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    pub fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        bar.set_style(style.progress_chars(BAR_CHARS));
    }
    bar
}
