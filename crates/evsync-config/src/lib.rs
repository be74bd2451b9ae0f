// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config storage for evsync tools.
//!
//! [`ConfigService`] serializes values as pretty JSON and hands raw blobs to a
//! [`ConfigStore`]. [`FsConfigStore`] keeps one `<key>.json` file per key,
//! either under the platform config directory or under an explicit root.

mod fs;
mod service;

pub use fs::FsConfigStore;
pub use service::{validate_key, ConfigError, ConfigService, ConfigStore};
