use std::io::Write;

use crate::{
    progress::{Phase, ProgressState},
    util,
};

const BAR_WIDTH: usize = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_downloaded: u64,
    pub bytes_downloaded: u64,
    pub files_converted: u64,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Downloaded {} file(s) ({}), converted {} to MP3",
            self.files_downloaded,
            util::format_bytes(self.bytes_downloaded),
            self.files_converted
        );
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Starting => "Starting",
        Phase::Downloading => "Downloading",
        Phase::Converting => "Converting",
        Phase::Done => "Done",
        Phase::Failed => "Failed",
    }
}

/// One status line, e.g. `Downloading [=======>       ] 2/5`.
pub fn render_progress(state: &ProgressState) -> String {
    let filled = (state.fraction() * BAR_WIDTH as f32).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    let mut bar = "=".repeat(filled);
    if filled < BAR_WIDTH && state.total > 0 {
        bar.push('>');
    }

    format!(
        "{:<11} [{:<width$}] {}/{}",
        phase_label(state.phase),
        bar,
        state.current,
        state.total,
        width = BAR_WIDTH
    )
}

/// Redraws the status line in place.
pub fn print_progress(state: &ProgressState) {
    print!("\x1b[2K\r{}", render_progress(state));
    let _ = std::io::stdout().lock().flush();
}
