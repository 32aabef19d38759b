#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self
)]

pub mod config;
pub mod control;
pub mod daemon;
pub mod directory;
pub mod gateway;
pub mod health;
pub mod lifecycle;
pub mod sync;
pub mod util;

pub use config::Config;
