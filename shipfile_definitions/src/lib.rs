#![allow(renamed_and_removed_lints)]
#![allow(non_snake_case)]

#[macro_use]
extern crate serde_derive;
extern crate serde_yaml;
extern crate serde_json;
extern crate serde;

#[macro_use]
extern crate tera;
#[cfg(feature = "filesystem")]
extern crate walkdir;

#[cfg(feature = "filesystem")]
extern crate dirs;

#[cfg(feature = "filesystem")]
extern crate glob;

#[macro_use]
extern crate log;

extern crate reqwest;

extern crate regex;

extern crate semver;
extern crate base64;
extern crate url;
extern crate url_serde;

#[macro_use] extern crate failure;

pub use failure::Error; //Fail
pub type Result<T> = std::result::Result<T, Error>;

/// Releases, repositories, helm defaults, hooks
pub mod release;
pub use release::{Release, Repository, HelmDefaults, Hook, Hooks, SetEntry, ValuesEntry};

/// Environments and the values/secrets layering that produces them
pub mod environment;
pub use environment::{EnvSpec, Environment, MissingFileHandler};

/// The top level state document
pub mod state;
pub use state::State;

// Merge behaviour: append-slice multi-document and base-file merge
mod merge;

/// A renderer of `tera` templates (jinja style), run twice per state file
///
/// Pass 1 evaluates with a stubbed, side-effect-free scope just far enough
/// to extract `environments:`. Pass 2 evaluates the same bytes with the full
/// scope (environment values, namespace, live template functions); only
/// pass-2 errors are fatal.
pub mod template;
pub use template::TwoPassRenderer;

/// `ValueResolver`: one interface over secret/value backends
pub mod resolver;
pub use resolver::{ValueResolver, ValueRef};

/// A Hashicorp Vault HTTP client using `reqwest`, implementing `ValueResolver`
pub mod vault;
pub use vault::Vault;

/// File backing: resolving `bases:`, values files, and directories of state files
#[cfg(feature = "filesystem")]
pub mod filebacked;
