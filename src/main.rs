use anyhow::Result;
use clap::Parser;
use mip::commands::{self, Config, lock_policy};
use std::path::PathBuf;

/// mip - package manager for MATLAB
///
/// Install packages from the mip index, from local .mhl files or from
/// archive URLs. Packages are activated per session with
/// `mip.import('name')` once the directory printed by `mip setup` is on the
/// MATLAB path.
///
/// Examples:
///   mip install chebfun            # Install chebfun and its dependencies
///   mip install ./surfacefun.mhl   # Install a local package archive
///   mip uninstall -y chebfun       # Remove chebfun and its dependents
#[derive(Parser, Debug)]
#[command(author, version = env!("MIP_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// mip root directory (defaults to ~/.mip; also via MIP_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "MIP_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub root: Option<PathBuf>,

    /// Package index URL (also via MIP_INDEX_URL)
    #[arg(
        long = "index-url",
        env = "MIP_INDEX_URL",
        value_name = "URL",
        global = true
    )]
    pub index_url: Option<String>,

    /// Fail immediately when another mip process holds a package lock
    #[arg(long = "no-wait", global = true)]
    pub no_wait: bool,

    /// Seconds to wait for a package lock held by another mip process
    #[arg(
        long = "lock-timeout",
        value_name = "SECS",
        default_value_t = 30,
        global = true
    )]
    pub lock_timeout: u64,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages and their dependencies
    Install(InstallArgs),

    /// Uninstall packages and the installed packages that depend on them
    Uninstall(UninstallArgs),

    /// List installed packages
    List(ListArgs),

    /// Print the directories a MATLAB session adds for a package
    Import(ImportArgs),

    /// Write the MATLAB integration files and print the path to add
    Setup,

    /// Report exposed symbols shared by several installed packages
    Collisions,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Package names, local .mhl files or .mhl URLs
    #[arg(value_name = "PACKAGE", required = true)]
    pub packages: Vec<String>,

    /// Reinstall the named packages even if they are installed
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(clap::Args, Debug)]
pub struct UninstallArgs {
    /// Package names
    #[arg(value_name = "PACKAGE", required = true)]
    pub packages: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Only list packages whose name matches this glob
    #[arg(value_name = "PATTERN")]
    pub pattern: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// Package name
    #[arg(value_name = "NAME")]
    pub name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = mip::runtime::RealRuntime;
    let config = Config::new(
        runtime,
        cli.root,
        cli.index_url,
        lock_policy(cli.no_wait, cli.lock_timeout),
    )?;

    match cli.command {
        Commands::Install(args) => {
            commands::install(config, &args.packages, args.overwrite).await?
        }
        Commands::Uninstall(args) => commands::uninstall(config, &args.packages, args.yes).await?,
        Commands::List(args) => commands::list(config, args.pattern.as_deref())?,
        Commands::Import(args) => commands::import(config, &args.name)?,
        Commands::Setup => commands::setup(config)?,
        Commands::Collisions => commands::collisions(config)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from(["mip", "install", "chebfun", "kdtree"]).unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.packages, vec!["chebfun", "kdtree"]);
                assert!(!args.overwrite);
            }
            _ => panic!("Expected Install command"),
        }
        assert!(!cli.no_wait);
        assert_eq!(cli.lock_timeout, 30);
    }

    #[test]
    #[cfg(not(mip_root_set))]
    fn test_cli_root_defaults_to_none() {
        let cli = Cli::try_parse_from(["mip", "list"]).unwrap();
        assert_eq!(cli.root, None);
    }

    #[test]
    fn test_cli_install_requires_package() {
        assert!(Cli::try_parse_from(["mip", "install"]).is_err());
    }

    #[test]
    fn test_cli_install_overwrite_parsing() {
        let cli = Cli::try_parse_from(["mip", "install", "--overwrite", "chebfun"]).unwrap();
        match cli.command {
            Commands::Install(args) => assert!(args.overwrite),
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_uninstall_yes_parsing() {
        let cli = Cli::try_parse_from(["mip", "uninstall", "-y", "chebfun"]).unwrap();
        match cli.command {
            Commands::Uninstall(args) => {
                assert_eq!(args.packages, vec!["chebfun"]);
                assert!(args.yes);
            }
            _ => panic!("Expected Uninstall command"),
        }
    }

    #[test]
    fn test_cli_list_pattern_parsing() {
        let cli = Cli::try_parse_from(["mip", "list", "cheb*"]).unwrap();
        match cli.command {
            Commands::List(args) => assert_eq!(args.pattern.as_deref(), Some("cheb*")),
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_cli_import_requires_name() {
        assert!(Cli::try_parse_from(["mip", "import"]).is_err());
        let cli = Cli::try_parse_from(["mip", "import", "chebfun"]).unwrap();
        assert!(matches!(cli.command, Commands::Import(args) if args.name == "chebfun"));
    }

    #[test]
    fn test_cli_global_options_parsing() {
        let cli = Cli::try_parse_from([
            "mip",
            "--root",
            "/tmp/mip",
            "setup",
            "--no-wait",
            "--lock-timeout",
            "5",
            "--index-url",
            "http://localhost/index.json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Setup));
        assert!(cli.no_wait);
        assert_eq!(cli.lock_timeout, 5);
        assert_eq!(
            cli.index_url.as_deref(),
            Some("http://localhost/index.json")
        );
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/mip")));
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["mip", "chebfun"]).is_err());
    }
}
