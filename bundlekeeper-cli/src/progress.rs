//! Terminal rendering of bundle events.
//!
//! Events arrive on a channel from the controller (possibly from its worker
//! thread) and are drained on a reporter thread that owns the progress bar.

use std::thread::{self, JoinHandle};

use bundlekeeper::bundle::BundleEvent;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

const BAR_TEMPLATE: &str =
    "  {spinner:.dim} [{elapsed_precise}] [{bar:30.yellow/dim}] {bytes:>10}/{total_bytes:10} {bytes_per_sec}";
const SPINNER_TEMPLATE: &str = "  {spinner:.dim} [{elapsed_precise}] {bytes:>10} {bytes_per_sec}";

/// What happened to the update while the reporter was listening.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventSummary {
    /// Version reported by `UpdateReady`.
    pub update_ready: Option<String>,
    /// Message of the last `UpdateFailed`.
    pub update_failed: Option<String>,
    /// Number of `BundleReady` events.
    pub bundle_ready: usize,
}

impl EventSummary {
    fn record(&mut self, event: &BundleEvent) {
        match event {
            BundleEvent::BundleReady { .. } => self.bundle_ready += 1,
            BundleEvent::UpdateReady { version } => self.update_ready = Some(version.clone()),
            BundleEvent::UpdateFailed { cause, .. } => {
                self.update_failed = Some(cause.to_string())
            }
            BundleEvent::UpdateStarted { .. } | BundleEvent::UpdateProgress { .. } => {}
        }
    }
}

/// Drains events until every sender is dropped.
pub struct ProgressReporter {
    handle: JoinHandle<EventSummary>,
}

impl ProgressReporter {
    /// Start rendering events from `events`.
    pub fn spawn(mut events: UnboundedReceiver<BundleEvent>, show_progress: bool) -> Self {
        let handle = thread::spawn(move || {
            let mut summary = EventSummary::default();
            let mut bar: Option<ProgressBar> = None;

            while let Some(event) = events.blocking_recv() {
                summary.record(&event);
                tracing::debug!(%event, "Bundle event");

                match &event {
                    BundleEvent::UpdateStarted { mode } => {
                        println!("{} update ({})", style("Downloading").cyan().bold(), mode);
                        if show_progress {
                            bar = Some(ProgressBar::new_spinner());
                        }
                    }
                    BundleEvent::UpdateProgress {
                        content_length,
                        read_length,
                    } => {
                        if let Some(bar) = &bar {
                            render_progress(bar, *content_length, *read_length);
                        }
                    }
                    BundleEvent::BundleReady { master_dir } => {
                        if let Some(bar) = bar.take() {
                            bar.finish_and_clear();
                        }
                        println!(
                            "{} {}",
                            style("Ready").green().bold(),
                            master_dir.display()
                        );
                    }
                    BundleEvent::UpdateReady { version } => {
                        if let Some(bar) = bar.take() {
                            bar.finish_and_clear();
                        }
                        println!(
                            "{} update {} downloaded; it is applied on the next reconcile",
                            style("Staged").green().bold(),
                            version
                        );
                    }
                    BundleEvent::UpdateFailed { mode, cause } => {
                        if let Some(bar) = bar.take() {
                            bar.abandon();
                        }
                        eprintln!(
                            "{} update ({}): {}",
                            style("Failed").red().bold(),
                            mode,
                            cause
                        );
                    }
                }
            }

            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            summary
        });

        Self { handle }
    }

    /// Wait for the channel to close and return what was seen.
    pub fn finish(self) -> EventSummary {
        self.handle.join().unwrap_or_default()
    }
}

fn render_progress(bar: &ProgressBar, content_length: Option<u64>, read_length: u64) {
    match content_length {
        Some(total) if bar.length() != Some(total) => {
            bar.set_style(style_for(BAR_TEMPLATE));
            bar.set_length(total);
        }
        None if bar.length().is_some() => {
            bar.set_style(style_for(SPINNER_TEMPLATE));
            bar.unset_length();
        }
        _ => {}
    }
    bar.set_position(read_length);
}

fn style_for(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("━━╾─"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
