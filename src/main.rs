use std::error::Error;

use clap::Parser;
use log::warn;
use modweave::{
    cli::args::{CliArgs, Command},
    patch::PatchOutcome,
    Modweave,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = CliArgs::parse();

    let mut builder = Modweave::builder().module_file_name(&cli_args.module_file_name);
    if let Some(workspace) = &cli_args.workspace {
        builder = builder.workspace(workspace);
    }
    if let Some(config) = &cli_args.config {
        builder = builder.config_file(config);
    }
    if let Command::Get { policy, .. } = &cli_args.cmd {
        builder = builder.local_changes_policy(*policy);
    }
    let modweave = builder.try_build()?;

    match cli_args.cmd {
        Command::Get { request, .. } => {
            let closure = modweave.get(&request)?;
            for (name, module) in closure.iter() {
                println!("{}@{}/{}", name, module.treeish, module.configuration);
            }
            Ok(())
        }
        Command::Cycles { start } => match modweave.cycles(&start)? {
            Some(cycle) => Err(format!("Dependency cycle: {}", cycle).into()),
            None => Ok(()),
        },
        Command::Patch {
            module,
            dep,
            configuration,
        } => {
            if modweave.patch(&module, &dep, configuration.as_deref())? == PatchOutcome::Unchanged {
                warn!("Nothing to change, {} already resolves `{}`", module, dep);
            }
            Ok(())
        }
        Command::Deps {
            module,
            configuration,
        } => {
            let report = modweave.deps(&module, configuration.as_deref())?;
            println!("[{}/{}]", report.module, report.configuration);
            if let Some(force) = &report.section.force {
                println!("force: {}", force.join(", "));
            }
            for dep in &report.section.deps {
                println!("{}", dep);
            }
            for artifact in &report.install {
                println!("install: {}", artifact);
            }
            Ok(())
        }
    }
}
