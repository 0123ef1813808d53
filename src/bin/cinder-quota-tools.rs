// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod tools;

use std::{env, path::Path, process};

use clap::{Arg, Command};
use env_logger::{Builder, Env};

use cinder_quota::cinder::VERSION;

use crate::tools::{cmds, ToolCommand};

const EXECUTABLE_NAME: &str = "cinder-quota-tools";

/// Warnings and errors are logged unless RUST_LOG says otherwise.
fn initialize_log() {
    Builder::from_env(Env::default().default_filter_or("warn")).init();
}

fn tool_name(arg: &str) -> Option<&str> {
    Path::new(arg).file_name().and_then(|name| name.to_str())
}

/// The command used when a tool is run as `cinder-quota-tools TOOL ...`
/// rather than through a link named after the tool.
fn top_level(tools: &[Box<dyn ToolCommand<'static>>]) -> Command {
    let listing = tools
        .iter()
        .map(|tool| format!("  {:<20} {}", tool.name(), tool.about()))
        .collect::<Vec<_>>()
        .join("\n");
    Command::new(EXECUTABLE_NAME)
        .version(VERSION)
        .about("Offline checks and reports over quota snapshots")
        .arg(
            Arg::new("tool")
                .required(true)
                .value_name("TOOL")
                .value_parser(tools.iter().map(|tool| tool.name()).collect::<Vec<_>>()),
        )
        .after_help(format!("Tools:\n{listing}"))
        .arg_required_else_help(true)
}

fn main() {
    initialize_log();

    let tools = cmds();
    let mut args = env::args().collect::<Vec<_>>();

    if args.first().and_then(|arg| tool_name(arg)) == Some(EXECUTABLE_NAME) {
        // Only the tool name is checked here; the tool parses the rest.
        top_level(&tools).get_matches_from(args.iter().take(2));
        args.remove(0);
    }

    let name = args
        .first()
        .and_then(|arg| tool_name(arg))
        .unwrap_or_default()
        .to_owned();
    let Some(tool) = tools.iter().find(|tool| tool.name() == name) else {
        eprintln!("{EXECUTABLE_NAME}: no tool named \"{name}\"");
        process::exit(2);
    };

    if let Err(err) = tool.run(args) {
        eprintln!("Error encountered: {err}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_parse_args() {
        top_level(&cmds()).debug_assert();
    }

    #[test]
    /// Every tool is listed with its description in the help text.
    fn test_top_level_lists_tools() {
        let tools = cmds();
        let help = top_level(&tools).render_long_help().to_string();
        for tool in &tools {
            assert!(help.contains(tool.name()));
            assert!(help.contains(tool.about()));
        }
    }
}
