extern crate clap;
extern crate loggerv;
extern crate shell_words;
extern crate shipfile;
extern crate shipfile_definitions;

#[macro_use]
extern crate log;
#[macro_use]
extern crate failure;

use std::path::Path;
use std::process;

use clap::{App, AppSettings, Arg, SubCommand};

use shipfile::engine::{self, EngineAction};
use shipfile::filter::Selector;
use shipfile::locator;
use shipfile::session::{GlobalFlags, Session};
use shipfile::{list, Result};

use shipfile_definitions::resolver::ResolverRegistry;
use shipfile_definitions::vault::Vault;

fn selector_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("selector")
        .short("l")
        .long("selector")
        .takes_value(true)
        .multiple(true)
        .number_of_values(1)
        .help("k=v,k!=v label selector; repeatable, OR'd across repetitions")
}

fn build_cli<'a, 'b>() -> App<'a, 'b> {
    App::new("shipfile")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declarative desired-state reconciliation for helm releases")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::with_name("file").short("f").long("file").takes_value(true).global(true))
        .arg(Arg::with_name("environment").short("e").long("environment").takes_value(true).default_value("default").global(true))
        .arg(selector_arg().global(true))
        .arg(Arg::with_name("namespace").short("n").long("namespace").takes_value(true).global(true))
        .arg(Arg::with_name("kube-context").long("kube-context").takes_value(true).global(true))
        .arg(Arg::with_name("helm-binary").short("b").long("helm-binary").takes_value(true).global(true))
        .arg(Arg::with_name("log-level").long("log-level").takes_value(true).default_value("info").global(true))
        .arg(Arg::with_name("quiet").short("q").long("quiet").global(true))
        .arg(Arg::with_name("no-color").long("no-color").global(true))
        .arg(Arg::with_name("interactive").short("i").long("interactive").global(true))
        .arg(Arg::with_name("allow-no-matching-release").long("allow-no-matching-release").global(true))
        .subcommand(SubCommand::with_name("repos").about("Add/update chart repositories"))
        .subcommand(SubCommand::with_name("diff").about("Preview changes")
            .arg(Arg::with_name("detailed-exitcode").long("detailed-exitcode"))
            .arg(Arg::with_name("args").long("args").takes_value(true)))
        .subcommand(SubCommand::with_name("template").about("Render chart templates locally"))
        .subcommand(SubCommand::with_name("lint").about("Lint every selected release's chart"))
        .subcommand(SubCommand::with_name("sync").about("Install/upgrade every selected release")
            .arg(Arg::with_name("concurrency").long("concurrency").takes_value(true))
            .arg(Arg::with_name("skip-deps").long("skip-deps"))
            .arg(Arg::with_name("skip-repo-update").long("skip-repo-update")))
        .subcommand(SubCommand::with_name("apply").about("diff, confirm, then sync/delete")
            .arg(Arg::with_name("concurrency").long("concurrency").takes_value(true))
            .arg(Arg::with_name("auto-approve").long("auto-approve")))
        .subcommand(SubCommand::with_name("status").about("Show release status"))
        .subcommand(SubCommand::with_name("delete").about("Uninstall selected releases (deprecated, non-purging)"))
        .subcommand(SubCommand::with_name("destroy").about("Uninstall and purge selected releases"))
        .subcommand(SubCommand::with_name("test").about("Run chart tests"))
        .subcommand(SubCommand::with_name("deps").about("Build/update chart dependencies"))
        .subcommand(SubCommand::with_name("build").about("Alias of template, for compatibility"))
        .subcommand(SubCommand::with_name("list").about("List selected releases")
            .arg(Arg::with_name("verbose").short("v").long("verbose"))
            .arg(Arg::with_name("environments").long("environments").help("list declared environment names instead of releases")))
        .subcommand(SubCommand::with_name("charts").about("Deprecated alias for sync"))
}

fn init_logger(matches: &clap::ArgMatches) -> Result<()> {
    let level = if matches.is_present("quiet") { "warn" } else { matches.value_of("log-level").unwrap_or("info") };
    let verbosity = match level {
        "debug" => 4,
        "info" => 2,
        "warn" => 1,
        "error" => 0,
        _ => 2,
    };
    loggerv::Logger::new()
        .verbosity(verbosity)
        .line_numbers(false)
        .module_path(false)
        .colors(!matches.is_present("no-color"))
        .init()
        .map_err(|e| format_err!("failed to initialize logger: {}", e))
}

fn selectors_from(matches: &clap::ArgMatches) -> Result<Vec<Selector>> {
    match matches.values_of("selector") {
        None => Ok(Vec::new()),
        Some(vals) => vals.map(Selector::parse).collect(),
    }
}

fn build_resolver() -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    if std::env::var("VAULT_ADDR").is_ok() {
        match Vault::from_evars() {
            Ok(vault) => registry.register(Box::new(vault)),
            Err(e) => warn!("VAULT_ADDR is set but vault could not be initialized: {}", e),
        }
    }
    registry
}

fn run() -> Result<i32> {
    shipfile::init()?;
    let app = build_cli();
    let matches = app.get_matches();
    init_logger(&matches)?;

    let selectors = selectors_from(&matches)?;
    let (sub_name, sub_matches) = matches.subcommand();
    let sub_matches = sub_matches.ok_or_else(|| format_err!("no subcommand given"))?;

    let flags = GlobalFlags {
        environment: matches.value_of("environment").unwrap_or("default").to_string(),
        namespace: matches.value_of("namespace").map(String::from),
        kube_context: matches.value_of("kube-context").map(String::from),
        helm_binary: matches.value_of("helm-binary").map(String::from),
        concurrency: sub_matches.value_of("concurrency").and_then(|v| v.parse().ok()).unwrap_or(0),
        extra_args: sub_matches.value_of("args").map(|a| shell_words::split(a).unwrap_or_default()).unwrap_or_default(),
        extra_values: Vec::new(),
        auto_approve: sub_matches.is_present("auto-approve"),
        allow_no_matching_release: matches.is_present("allow-no-matching-release"),
        interactive: matches.is_present("interactive"),
    };

    let resolver = build_resolver();
    let session = Session::new(flags, resolver);
    session.install_signal_handler()?;

    let action = match sub_name {
        "sync" | "charts" => Some(EngineAction::Sync),
        "diff" => Some(EngineAction::Diff),
        "template" | "build" => Some(EngineAction::Template),
        "lint" => Some(EngineAction::Lint),
        "delete" => Some(EngineAction::Delete),
        "destroy" => Some(EngineAction::Destroy),
        "test" => Some(EngineAction::Test),
        "status" => Some(EngineAction::Status),
        "deps" => Some(EngineAction::Deps),
        "apply" => Some(EngineAction::Apply),
        _ => None,
    };

    let files = locator::locate(matches.value_of("file"), Path::new("."))?;

    if sub_name == "list" {
        for file in &files {
            let (state, _env) = shipfile_definitions::filebacked::load_state_file(
                file, &session.flags.environment, None, 0, &session.resolver,
            )?;
            if sub_matches.is_present("environments") {
                list::environments(&state)?;
            } else if sub_matches.is_present("verbose") {
                list::releases_verbose(&state)?;
            } else {
                list::releases(&state)?;
            }
        }
        session.cleanup.remove_all();
        return Ok(0);
    }

    if sub_name == "repos" {
        for file in &files {
            let (state, _env) = shipfile_definitions::filebacked::load_state_file(
                file, &session.flags.environment, None, 0, &session.resolver,
            )?;
            for repo in &state.repositories {
                info!("helm repo add {} {}", repo.name, repo.url);
                let status = std::process::Command::new(session.flags.helm_binary.as_deref().unwrap_or("helm"))
                    .arg("repo")
                    .arg("add")
                    .arg(&repo.name)
                    .arg(&repo.url)
                    .status();
                if let Err(e) = status {
                    warn!("failed to add repo {}: {}", repo.name, e);
                }
            }
        }
        session.cleanup.remove_all();
        return Ok(0);
    }

    let action = action.ok_or_else(|| format_err!("unsupported subcommand {}", sub_name))?;

    let mut any_failures = false;
    let mut any_releases_seen = false;
    // Files are processed lexically, one at a time (spec.md 5-ii). A
    // file-scoped load error (ConfigError/SelectorParseError/
    // DuplicateReleaseError/StateLoadError) aborts only that file; siblings
    // discovered by the locator still run (spec.md 7).
    for file in &files {
        let report = match engine::run_file(file, action, &selectors, &session) {
            Ok(report) => report,
            Err(e) => {
                error!("{}: {}", file.display(), e);
                any_failures = true;
                continue;
            }
        };
        any_releases_seen |= report.releases_seen > 0;
        for failure in &report.failures {
            error!("{}", failure);
        }
        any_failures |= !report.ok();
    }

    session.cleanup.remove_all();

    if any_failures {
        return Ok(1);
    }
    if !any_releases_seen && !session.flags.allow_no_matching_release {
        return Ok(3);
    }
    Ok(0)
}

fn main() {
    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
