use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright_green, bright_red, bright_yellow};

/// Spinner shown on stderr while a view is loading.
pub struct LoadingSpinner {
    pb: ProgressBar,
}

impl LoadingSpinner {
    pub fn start(what: &str) -> Self {
        Self {
            pb: create_spinner(bright_yellow(format!("Loading {what}")).to_string()),
        }
    }

    pub fn finish(self, what: &str) {
        self.pb
            .finish_with_message(bright_green(format!("Loaded {what} ✓")).to_string());
    }

    pub fn fail(self, what: &str) {
        self.pb
            .abandon_with_message(bright_red(format!("Could not load {what}")).to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
