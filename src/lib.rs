pub mod collection;
pub mod config;
pub mod constants;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod manifest;
pub mod oci;
pub mod signing;

pub use collection::{Collection, Node};
pub use descriptor::{Descriptor, MediaKind};
pub use digest::Digest;
pub use error::LoadError;
pub use fetch::Fetcher;
pub use loader::{load_from_manifest, LoadStats, ManifestLoader};
