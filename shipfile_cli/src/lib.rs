#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]
#![allow(non_snake_case)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

extern crate openssl_probe;

// DAG scheduling for `needs:` edges
extern crate petgraph;

#[macro_use]
extern crate log;
extern crate loggerv;

// sanity / misc
extern crate chrono;
extern crate dirs;
extern crate regex;
extern crate semver;

// parallel wave execution
extern crate threadpool;

extern crate ctrlc;
extern crate glob;
extern crate shell_words;
extern crate tempfile;

#[macro_use]
extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

extern crate shipfile_definitions;
pub use shipfile_definitions::{Environment, EnvSpec, HelmDefaults, Release, Repository, State};

/// The explicit, per-reconciliation `Session` (spec.md design notes 9):
/// global flags, shared resolver, shared cleanup registry, cancellation.
pub mod session;

/// Temp-file ownership and guaranteed removal on every exit path.
pub mod cleanup;

/// `FileLocator`: resolves `--file` to a single state file or an ordered
/// set under a directory.
pub mod locator;

/// `ReleaseFilter`: label-selector grammar and duplicate-name detection.
pub mod filter;

/// DAG Planner: topological wave grouping over `needs:` edges.
pub mod dag;

/// Worker Pool: bounded per-wave concurrency with isolated per-release
/// errors.
pub mod workerpool;

/// `CommandShaper`: release + defaults + CLI flags -> `ExecSpec`.
pub mod shaper;

/// Executor: runs a shaped command, streams output, classifies exit codes.
pub mod executor;

/// ApplyController: diff -> affected set -> confirm -> sync/delete.
pub mod apply;

/// NestedDispatcher: resolves and schedules `helmfiles:` entries.
pub mod nested;

/// `shipfile list` convenience printers.
pub mod list;

/// Lock files: `<file>.lock` pins the chart/version each release resolved
/// to on its last successful sync.
pub mod lock;

/// The reconciliation engine: ties the locator, filter, planner, worker
/// pool, and nested dispatcher together into one run per root state file.
pub mod engine;

/// Smart initialiser: lets `shipfile` be invoked from any directory when
/// `SHIPFILE_STATE_DIR` points at the state file's directory, mirroring
/// the teacher's `SHIPCAT_MANIFEST_DIR` trick (spec.md 6 default
/// locations are resolved relative to the current directory).
pub fn init() -> Result<()> {
    use std::env;
    use std::path::Path;
    openssl_probe::init_ssl_cert_env_vars();

    if let Ok(dir) = env::var("SHIPFILE_STATE_DIR") {
        let pth = Path::new(&dir);
        if !pth.is_dir() {
            bail!("SHIPFILE_STATE_DIR must exist");
        }
        env::set_current_dir(pth)?;
    }

    Ok(())
}
