//! This file contains the `shipfile list` convenience printers, in the
//! style of the teacher's `regions`/`locations`/`services` listers.

use shipfile_definitions::State;

use crate::Result;

/// Print the names of every release in the state, one per line, in
/// declaration order.
pub fn releases(state: &State) -> Result<()> {
    for release in &state.releases {
        println!("{}", release.name);
    }
    Ok(())
}

/// Print `name\tnamespace\tchart` for every release, for quick inspection
/// from a terminal.
pub fn releases_verbose(state: &State) -> Result<()> {
    for release in &state.releases {
        println!("{}\t{}\t{}", release.name, release.namespace, release.chart);
    }
    Ok(())
}

/// Print the declared environment names.
pub fn environments(state: &State) -> Result<()> {
    for name in state.environments.keys() {
        println!("{}", name);
    }
    Ok(())
}
