#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the `hh_atlas` binary.
//!
//! [`init_logger`] routes `log` output through `indicatif-log-bridge`, so
//! log lines print above the progress bars instead of tearing them.
//! [`IndicatifProgress`] renders pipeline progress reported through
//! [`ProgressCallback`].

use std::sync::Arc;
use std::time::Duration;

use hh_atlas_pipeline_models::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// A [`ProgressBar`] driven by pipeline progress callbacks.
///
/// Starts as a spinner and becomes a bar once a total is known.
pub struct IndicatifProgress {
    bar: ProgressBar,
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    fn spinner(
        multi: &MultiProgress,
        message: &str,
        color: &str,
        bar_style: ProgressStyle,
    ) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template(&format!("{{spinner:.{color}}} {{msg}}"))
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        Arc::new(Self { bar, bar_style })
    }

    /// Progress of a geocoding round, one tick per address. Shows the
    /// request rate, since rounds are bound by the provider's rate limit.
    #[must_use]
    pub fn round_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {per_sec} [{eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self::spinner(multi, message, "cyan", style)
    }

    /// Progress of a store step counted in artifacts or rows.
    #[must_use]
    pub fn step_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self::spinner(multi, message, "green", style)
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Installs `pretty_env_logger` behind `indicatif-log-bridge`.
///
/// The level defaults to `info` and can be changed with `RUST_LOG`.
/// Returns the [`MultiProgress`] every bar must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // A logger may already be installed (tests, repeated init).
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}
