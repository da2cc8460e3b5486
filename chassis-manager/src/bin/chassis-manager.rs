// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the chassis manager

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use camino::Utf8PathBuf;
use chassis_manager::run_server;
use chassis_manager::Config;
use clap::Parser;

#[derive(Debug, Parser)]
#[clap(name = "chassis-manager", about = "Blade chassis control plane")]
struct Args {
    #[clap(name = "CONFIG_FILE_PATH", action)]
    config_file_path: Utf8PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(error) = do_run().await {
        eprintln!("chassis-manager: {:#}", error);
        std::process::exit(1);
    }
}

async fn do_run() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config_file_path)
        .with_context(|| "loading configuration")?;

    run_server(config).await.map_err(|message| anyhow!(message))
}
