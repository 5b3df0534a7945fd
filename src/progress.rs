//! Progress reporting for verbose drives: one byte-based bar per feedstock.

use crate::paths::FeedstockJob;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs;
use std::sync::{Arc, OnceLock};

/// Optional global MultiProgress so bars for parallel sources render together.
static GLOBAL_MP: OnceLock<Arc<MultiProgress>> = OnceLock::new();

/// Install a global MultiProgress used by all subsequently created bars.
/// Additional calls are ignored.
pub fn set_global_multiprogress(mp: Arc<MultiProgress>) {
    let _ = GLOBAL_MP.set(mp);
}

fn new_bar(total: u64) -> ProgressBar {
    if let Some(mp) = GLOBAL_MP.get() {
        mp.add(ProgressBar::new(total))
    } else {
        ProgressBar::new(total)
    }
}

fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} {msg} {bytes:>10}/{total_bytes:<10} [{bar:.cyan/blue}] {percent:>3}%  \
         elapsed: {elapsed_precise}  eta: {eta_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
}

pub fn total_feedstock_size(jobs: &[FeedstockJob]) -> u64 {
    jobs.iter()
        .map(|j| fs::metadata(&j.path).map(|m| m.len()).unwrap_or(0))
        .sum()
}

/// Thin wrapper over an indicatif bar that is a no-op when hidden.
pub struct ProgressScope {
    pb: ProgressBar,
}

impl ProgressScope {
    pub fn bytes<T: Into<String>>(label: T, total_bytes: u64) -> Self {
        let pb = new_bar(total_bytes);
        pb.set_style(bytes_style());
        pb.set_message(label.into());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    pub fn hidden() -> Self {
        Self { pb: ProgressBar::hidden() }
    }

    #[inline]
    pub fn inc_bytes(&self, delta: u64) {
        self.pb.inc(delta);
    }

    pub fn finish<T: Into<String>>(&self, msg: T) {
        self.pb.finish_with_message(msg.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    #[test]
    fn bars_join_the_installed_multiprogress() {
        let mp = Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        set_global_multiprogress(mp.clone());
        set_global_multiprogress(Arc::new(MultiProgress::new()));
        let installed = GLOBAL_MP.get().unwrap();
        assert!(Arc::ptr_eq(installed, &mp));

        let a = ProgressScope::bytes("a", 10);
        let b = ProgressScope::bytes("b", 20);
        a.inc_bytes(10);
        b.inc_bytes(5);
        a.finish("a done");
        b.finish("b done");
    }
}
