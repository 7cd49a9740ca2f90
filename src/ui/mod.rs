//! UI helpers for consistent CLI status output
//!
//! Uses `cliclack` in interactive terminals with a plain fallback in
//! CI/non-interactive environments. All status output goes to stderr so
//! response bodies can be piped from stdout.
//!
//! # Example
//!
//! ```rust,ignore
//! use galaxy_proxy::ui::{self, TaskSpinner, UiContext};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Fetching /api/v3/collections/community/general/versions/");
//! // ... do work ...
//! spinner.stop("miss, stored 2 KiB");
//! ui::step_warn_hint(&ctx, "Upstream unreachable", "Serving stale copy");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{intro, remark, step_error_detail, step_info, step_ok, step_ok_detail, step_warn_hint};
pub use progress::TaskSpinner;
