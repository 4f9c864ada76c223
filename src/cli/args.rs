use clap::Parser;

use crate::git::LocalChangesPolicy;

/// Dependency manager for modules spread over many git repositories.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Directory holding one checkout per module.
    /// Defaults to `workspace.dir` from the configuration, then the current directory.
    #[clap(short, long)]
    pub workspace: Option<String>,
    /// Configuration file, defaults to `$HOME/.modweave/config.toml`.
    #[clap(long, env = "MODWEAVE_CONFIG")]
    pub config: Option<String>,
    #[clap(short, long, default_value = "module.toml")]
    pub module_file_name: String,
}

#[derive(Debug, Parser)]
pub enum Command {
    ///Checks out a module and everything it depends on
    Get {
        /// `module[@treeish][/configuration]`
        request: String,
        #[clap(short, long, value_enum, default_value_t = LocalChangesPolicy::Fail)]
        policy: LocalChangesPolicy,
    },
    ///Prints the first dependency cycle reachable from a module, fails if there is one
    Cycles {
        /// `module[/configuration]`
        start: String,
    },
    ///Makes a configuration of a module depend on the given dependency line
    Patch {
        module: String,
        /// `name[@treeish][/configuration]`
        dep: String,
        /// Defaults to the module's default configuration
        #[clap(short, long)]
        configuration: Option<String>,
    },
    ///Prints the resolved dependencies, force list and install artifacts of a configuration
    Deps {
        module: String,
        #[clap(short, long)]
        configuration: Option<String>,
    },
}
