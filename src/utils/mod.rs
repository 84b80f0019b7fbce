// SPDX-License-Identifier: GPL-3.0-only
pub mod endpoint;
pub mod time;

pub use endpoint::{endpoint_url, validate_base_url};
pub use time::now_timestamp;
