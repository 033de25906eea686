use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};

/// Progress display for the long-running CLI commands
pub struct ProgressTracker {
    multi: Arc<MultiProgress>,
    bars: Mutex<Vec<ProgressBar>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            multi: Arc::new(MultiProgress::new()),
            bars: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, pb: &ProgressBar) {
        if let Ok(mut bars) = self.bars.lock() {
            bars.push(pb.clone());
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        self.track(&pb);
        pb
    }

    pub fn finish_all(&self) {
        if let Ok(bars) = self.bars.lock() {
            for bar in bars.iter() {
                bar.finish_and_clear();
            }
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
