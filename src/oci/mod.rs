//! OCI collaborators of the loader: where manifest bytes come from and
//! which credentials unlock them.
//!
//! - `layout`: blobs from an OCI image layout directory
//! - `registry`: blobs from a registry over the distribution API
//! - `keychain`: credentials from docker-style config files
//! - `reference`: `registry/repository[:tag][@digest]` parsing

pub mod keychain;
pub mod layout;
pub mod reference;
pub mod registry;

pub use keychain::{Authenticator, ConfigKeychain, Keychain, MultiKeychain};
pub use layout::LayoutFetcher;
pub use reference::Reference;
pub use registry::{RegistryFetcher, RegistryOptions};
