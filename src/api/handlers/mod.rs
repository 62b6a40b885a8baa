mod admin;
mod assets;
mod streams;

pub use admin::{delivery_status, health, run_cost_monitor, set_emergency};
pub use assets::{add_variant, delete_asset, get_asset, list_storage_files, upload_asset};
pub use streams::{finish_stream, report_progress, start_stream};
