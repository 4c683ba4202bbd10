mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::LoadingSpinner;
pub use styling::{dim, magenta_bold, status};
pub use summary::{
    render_activity, render_build_logs, render_builds, render_dashboard, render_detail,
    render_event, render_notice, render_pipelines, render_user,
};

/// Prints the pipewatch banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🛰  pipewatch"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("CI/CD pipeline dashboard")
    );
}
