//! Utility functions shared by configuration and URL building.
//!
//! # Examples
//!
//! ```
//! use tidemark::util::{join_path, validate_base_url};
//!
//! let base = validate_base_url("https://xkcd.com").unwrap();
//! let url = join_path(base.as_str(), "/info.0.json");
//! assert_eq!(url, "https://xkcd.com/info.0.json");
//! ```

mod url_validator;

pub use url_validator::{join_path, validate_base_url, UrlValidationError};
