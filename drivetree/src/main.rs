use anyhow::Context;
use drive_core::DriveClient;
use drivetree::config::{self, TreeConfig};
use drivetree::directory::{DriveDirectory, FolderDirectory, MemoryDirectory};
use drivetree::logging::init_logging;
use drivetree::replay::{ErrorClassTable, Reconstructor, ReplayOptions, RetryGovernor};
use drivetree::tree::{TreeBuilder, TreeNode, load_document, save_document};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Snapshot { flat: bool },
    Replay { dry_run: bool },
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CliArgs {
    mode: CliMode,
    verbose: bool,
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = None;
    let mut flat = false;
    let mut dry_run = false;
    let mut verbose = false;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "snapshot" if mode.is_none() => mode = Some(CliMode::Snapshot { flat: false }),
            "replay" if mode.is_none() => mode = Some(CliMode::Replay { dry_run: false }),
            "help" | "--help" | "-h" => mode = Some(CliMode::Help),
            "--flat" => flat = true,
            "--dry-run" => dry_run = true,
            "--verbose" | "-v" => verbose = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    let mode = match mode.unwrap_or(CliMode::Help) {
        CliMode::Snapshot { .. } if dry_run => anyhow::bail!("--dry-run only applies to replay"),
        CliMode::Snapshot { .. } => CliMode::Snapshot { flat },
        CliMode::Replay { .. } if flat => anyhow::bail!("--flat only applies to snapshot"),
        CliMode::Replay { .. } => CliMode::Replay { dry_run },
        CliMode::Help => CliMode::Help,
    };
    Ok(CliArgs { mode, verbose })
}

fn print_usage() {
    println!("Usage: drivetree <snapshot [--flat] | replay [--dry-run] | help> [--verbose]");
    println!("  snapshot    Save the folder trees listed in roots.txt to tree.yaml");
    println!("  --flat      Read every folder in one listing and assemble the trees locally");
    println!("  replay      Recreate tree.yaml on the account behind DRIVETREE_TOKEN");
    println!("  --dry-run   Replay against an in-memory account and report what would happen");
    println!("  --verbose   Log at debug level unless RUST_LOG is set");
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = parse_cli_args(std::env::args())?;
    if args.mode == CliMode::Help {
        print_usage();
        return Ok(());
    }
    init_logging(args.verbose)?;
    let config = TreeConfig::from_env();
    let mut governor = RetryGovernor::new(config.backoff, ErrorClassTable::default());

    match args.mode {
        CliMode::Snapshot { flat } => {
            let roots = config::read_root_paths(&config.roots_file)?;
            let directory = remote_directory(&config)?;
            let forest = TreeBuilder::new(&directory, &mut governor)
                .snapshot_roots(&roots, flat)
                .await?;
            save_document(&config.tree_file, &forest)?;
            let folders: usize = forest.iter().map(TreeNode::node_count).sum();
            info!(
                folders,
                path = %config.tree_file.display(),
                "tree saved"
            );
        }
        CliMode::Replay { dry_run } => {
            let forest = load_document(&config.tree_file)?;
            let options = replay_options(&config)?;
            if dry_run {
                let directory = MemoryDirectory::new();
                replay(&directory, &mut governor, &options, &forest).await?;
            } else {
                let directory = remote_directory(&config)?;
                replay(&directory, &mut governor, &options, &forest).await?;
            }
        }
        CliMode::Help => {}
    }
    Ok(())
}

fn remote_directory(config: &TreeConfig) -> anyhow::Result<DriveDirectory> {
    let token = config.require_token()?;
    let client = match &config.api_base {
        Some(base) => DriveClient::with_base_url(base, token)
            .with_context(|| format!("invalid DRIVETREE_API_BASE {base}"))?,
        None => DriveClient::new(token)?,
    };
    Ok(DriveDirectory::new(client.with_page_size(config.page_size)))
}

fn replay_options(config: &TreeConfig) -> anyhow::Result<ReplayOptions> {
    let new_owner = config::read_owner_email(&config.owner_file)?;
    let placeholders = match &config.placeholder_file {
        Some(path) => config::read_placeholders(path)?,
        None => Default::default(),
    };
    Ok(ReplayOptions {
        new_owner,
        placeholders,
    })
}

async fn replay<D: FolderDirectory>(
    directory: &D,
    governor: &mut RetryGovernor,
    options: &ReplayOptions,
    forest: &[TreeNode],
) -> anyhow::Result<()> {
    let report = Reconstructor::new(directory, governor, options)
        .replay(forest)
        .await?;
    println!(
        "created {} folders, reused {}, wrote {} permissions, skipped {}",
        report.created, report.reused, report.permissions_written, report.permissions_skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("drivetree")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_cli_args_defaults_to_help() {
        let parsed = parse_cli_args(args(&[])).unwrap();
        assert_eq!(parsed.mode, CliMode::Help);
        assert!(!parsed.verbose);
    }

    #[test]
    fn parse_cli_args_supports_snapshot() {
        let parsed = parse_cli_args(args(&["snapshot"])).unwrap();
        assert_eq!(parsed.mode, CliMode::Snapshot { flat: false });
        let parsed = parse_cli_args(args(&["--flat", "snapshot", "--verbose"])).unwrap();
        assert_eq!(parsed.mode, CliMode::Snapshot { flat: true });
        assert!(parsed.verbose);
    }

    #[test]
    fn parse_cli_args_supports_replay() {
        let parsed = parse_cli_args(args(&["replay", "--dry-run"])).unwrap();
        assert_eq!(parsed.mode, CliMode::Replay { dry_run: true });
    }

    #[test]
    fn parse_cli_args_rejects_mismatched_flags() {
        assert!(parse_cli_args(args(&["snapshot", "--dry-run"])).is_err());
        assert!(parse_cli_args(args(&["replay", "--flat"])).is_err());
        assert!(parse_cli_args(args(&["snapshot", "replay"])).is_err());
        assert!(parse_cli_args(args(&["--bogus"])).is_err());
    }
}
