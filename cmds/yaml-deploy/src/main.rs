use anyhow::Result;
use clap::Parser;
use yaml_deploy::{
	commands::{self, deploy::DeployArgs, output::BrokenPipeGuard},
	telemetry,
};

#[derive(Parser)]
#[command(name = "yaml-deploy")]
#[command(about = "Create or update a Deployment and its Service from a YAML file", long_about = None)]
#[command(version)]
struct Cli {
	#[command(flatten)]
	deploy: DeployArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	// The guard flushes exported spans when it goes out of scope, so it must
	// outlive the command.
	let _telemetry = telemetry::init(cli.deploy.log_level)?;

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	commands::deploy::run(cli.deploy, stdout).await
}
