//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Path segment of the processing endpoint.
pub const DEFAULT_ENDPOINT: &str = "process";

/// JSON key holding the input text.
pub const DEFAULT_INPUT_FIELD: &str = "text";

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "trevor=info,info";

/// Default on-disk session database: `~/.trevor/trevor.db`.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".trevor").join("trevor.db"))
}
