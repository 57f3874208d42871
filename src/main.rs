// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use lockyard::commands::expire::ExpireCommand;
use lockyard::commands::hold::HoldCommand;
use lockyard::commands::list::ListCommand;
use lockyard::commands::status::StatusCommand;
use lockyard::config::new_registry_config;
use lockyard::error::{Result, format_error_chain, get_exit_code};
use lockyard::logging;

#[derive(Parser)]
#[command(name = "lockyard")]
#[command(author, version, about = "Inspect and manage named distributed locks", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List locks currently recorded in the store
    #[command(visible_alias = "ls")]
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show who holds a lock
    Status {
        /// Lock key
        key: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove lock records older than the expiry age
    ///
    /// Removing a record whose owner is still running breaks mutual exclusion.
    Expire {
        /// Age in seconds (defaults to keyed_store.expire_after_ms)
        #[arg(long, value_name = "SECONDS")]
        older_than: Option<u64>,
    },

    /// Acquire a lock and hold it until Ctrl-C
    Hold {
        /// Lock key
        key: String,

        /// How long to wait for the lock (e.g. "30", "500ms", "2m", "infinite")
        #[arg(long, value_name = "TIMEOUT")]
        timeout: Option<String>,

        /// Release after this many seconds instead of waiting for Ctrl-C
        #[arg(long = "for", value_name = "SECONDS")]
        hold_for: Option<u64>,
    },
}

fn setup_logger(cli: &Cli) {
    logging::setup_logger(cli.verbose);
}

fn main() {
    let cli = Cli::parse();

    setup_logger(&cli);

    let config = match new_registry_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error_chain(&e));
            std::process::exit(get_exit_code(&e));
        }
    };

    let result: Result<()> = (|| match cli.command {
        Commands::List { json } => {
            let command = ListCommand::new(&config)?;
            command.execute(json)
        }
        Commands::Status { key, json } => {
            let command = StatusCommand::new(&config)?;
            command.execute(&key, json)
        }
        Commands::Expire { older_than } => {
            let command = ExpireCommand::new(&config)?;
            command.execute(older_than)
        }
        Commands::Hold {
            key,
            timeout,
            hold_for,
        } => {
            let command = HoldCommand::new(&config)?;
            command.execute(&key, timeout.as_deref(), hold_for)
        }
    })();

    if let Err(e) = result {
        eprintln!("{}", format_error_chain(&e));
        std::process::exit(get_exit_code(&e));
    }
}
