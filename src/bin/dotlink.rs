// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotlink::{
    install::SystemRunner,
    link::{LinkOptions, LinkReport},
    path::default_manifest_path,
    store::Store,
    sync::SyncDirection,
    vcs::PullOutcome,
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotlink [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to manifest file.
    #[arg(short, long, global = true, env = "DOTLINK_CONFIG", value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => default_manifest_path()?,
        };
        let store = Store::open(path)?;

        match self.command {
            Command::Link(opts) => run_link(&store, opts),
            Command::Unlink(opts) => run_unlink(&store, opts),
            Command::SyncPush(opts) => run_sync_push(&store, opts),
            Command::SyncPull(opts) => run_sync_pull(&store, opts),
            Command::Status(opts) => run_status(&store, opts),
            Command::Install => run_install(&store),
            Command::Clone(opts) => run_clone(&store, opts),
            Command::Backups => run_backups(&store),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Link packages into the live environment.
    #[command(override_usage = "dotlink link [options] [<package>]...")]
    Link(LinkCmdOptions),

    /// Remove links of packages from the live environment.
    #[command(override_usage = "dotlink unlink [<package>]...")]
    Unlink(PackageFilter),

    /// Capture live changes, commit them, and push to remote.
    ///
    /// Package filters only limit which copies are captured into the
    /// repository. Every change in the repository's working tree is
    /// committed, even for packages outside the filter.
    #[command(override_usage = "dotlink sync-push [options] [<package>]...")]
    SyncPush(SyncPushOptions),

    /// Pull from remote and link packages again.
    #[command(override_usage = "dotlink sync-pull [options] [<package>]...")]
    SyncPull(LinkCmdOptions),

    /// Show state of every link of packages.
    #[command(override_usage = "dotlink status [<package>]...")]
    Status(PackageFilter),

    /// Install missing tools listed in manifest.
    Install,

    /// Clone dotfile repository from remote.
    #[command(override_usage = "dotlink clone [options] <url>")]
    Clone(CloneOptions),

    /// List backup records.
    Backups,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PackageFilter {
    /// Glob patterns of packages to operate on. Uses all packages if empty.
    #[arg(value_name = "package")]
    pub packages: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LinkCmdOptions {
    /// Fail instead of replacing targets that are in the way.
    #[arg(short, long)]
    pub no_clobber: bool,

    #[command(flatten)]
    pub filter: PackageFilter,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncPushOptions {
    /// Commit message to use instead of the configured one.
    #[arg(short, long, value_name = "message")]
    pub message: Option<String>,

    #[command(flatten)]
    pub filter: PackageFilter,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CloneOptions {
    /// URL of remote to clone from.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Select branch to checkout.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = Cli::parse().run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn check_report(report: &LinkReport) -> Result<()> {
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} of {} links failed", report.outcomes().len());
    }

    Ok(())
}

fn run_link(store: &Store, opts: LinkCmdOptions) -> Result<()> {
    let options = LinkOptions {
        no_clobber: opts.no_clobber,
    };
    let report = store.link(&opts.filter.packages, options)?;
    check_report(&report)
}

fn run_unlink(store: &Store, opts: PackageFilter) -> Result<()> {
    let report = store.unlink(&opts.packages)?;
    check_report(&report)
}

fn run_sync_push(store: &Store, opts: SyncPushOptions) -> Result<()> {
    let report = store.sync(
        SyncDirection::Push,
        &opts.filter.packages,
        opts.message,
        LinkOptions::default(),
    )?;
    if let Some(commit) = report.commit {
        info!("pushed commit {commit}");
    }

    check_report(&report.files)
}

fn run_sync_pull(store: &Store, opts: LinkCmdOptions) -> Result<()> {
    let options = LinkOptions {
        no_clobber: opts.no_clobber,
    };
    let report = store.sync(SyncDirection::Pull, &opts.filter.packages, None, options)?;
    match report.pulled {
        Some(PullOutcome::FastForward(oid)) => info!("fast-forwarded to {oid}"),
        Some(PullOutcome::UpToDate) => info!("already up to date"),
        None => {}
    }

    check_report(&report.files)
}

fn run_status(store: &Store, opts: PackageFilter) -> Result<()> {
    let mut failed = 0;
    for status in store.status(&opts.packages)? {
        match status.state {
            Ok(state) => println!(
                "{}\t{}\t{}",
                status.package,
                state,
                status.pair.target.display()
            ),
            Err(err) => {
                failed += 1;
                error!("{}: {err}", status.package);
            }
        }
    }

    if failed > 0 {
        bail!("failed to inspect {failed} links");
    }

    Ok(())
}

fn run_install(store: &Store) -> Result<()> {
    let failed = store
        .install(&SystemRunner)
        .iter()
        .filter(|(_, status)| status.is_failed())
        .count();
    if failed > 0 {
        bail!("{failed} tools failed to install");
    }

    Ok(())
}

fn run_clone(store: &Store, opts: CloneOptions) -> Result<()> {
    let repo = store.clone_repository(&opts.url, opts.branch.as_deref())?;
    info!("cloned {} into {:?}", opts.url, repo.workdir().display());
    Ok(())
}

fn run_backups(store: &Store) -> Result<()> {
    for record in store.backups()? {
        println!("{}", record.display());
    }

    Ok(())
}
