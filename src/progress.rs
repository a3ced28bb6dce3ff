//! Progress bar for the number of accepted sample paths.
//!
//! Only one progress bar can be active at a time, so only one shard should display it.
//! Without the `progress_bar` feature the bar does nothing.

#[cfg(feature = "progress_bar")]
use progress_bar::{
    finalize_progress_bar, init_progress_bar, set_progress_bar_action,
    set_progress_bar_progress, Color, Style,
};

use crate::log::trace;

pub struct AcceptedPathsProgress {
    #[cfg_attr(not(feature = "progress_bar"), allow(dead_code))]
    target: usize,
    enabled: bool,
}

impl AcceptedPathsProgress {
    /// Initializes the progress bar with the number of paths to accept.
    #[must_use]
    pub fn new(target: usize, enabled: bool) -> AcceptedPathsProgress {
        let enabled = enabled && cfg!(feature = "progress_bar") && target > 0;
        if enabled {
            trace!("initializing accepted paths progress bar with target {target}");
            #[cfg(feature = "progress_bar")]
            {
                init_progress_bar(target);
                set_progress_bar_action("Accepted", Color::Blue, Style::Bold);
            }
        }
        AcceptedPathsProgress { target, enabled }
    }

    /// Updates the bar with the current count, finalizing it at the target.
    pub fn update(&self, accepted: usize) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "progress_bar")]
        {
            set_progress_bar_progress(accepted.min(self.target));
            if accepted >= self.target {
                finalize_progress_bar();
            }
        }
        #[cfg(not(feature = "progress_bar"))]
        let _ = accepted;
    }
}
