// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

use crate::tools::{check_quotas, show_quotas};

use cinder_quota::cinder::VERSION;

pub trait ToolCommand<'a> {
    fn name(&self) -> &'a str;
    fn about(&self) -> &'a str;
    fn run(&self, command_line_args: Vec<String>) -> Result<(), String>;
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .action(ArgAction::Set)
        .value_name("FILE")
        .value_parser(clap::value_parser!(PathBuf))
        .help("JSON file of quota configuration options")
}

struct CinderQuotaCheck;

impl CinderQuotaCheck {
    const ABOUT: &'static str =
        "Check that the allocated quotas of a project hierarchy are consistent";

    fn cmd() -> Command {
        Command::new("cinder-quota-check")
            .version(VERSION)
            .about(CinderQuotaCheck::ABOUT)
            .next_line_help(true)
            .arg(
                Arg::new("file")
                    .value_parser(clap::value_parser!(PathBuf))
                    .required(true)
                    .help("File containing a quota snapshot as JSON"),
            )
            .arg(
                Arg::new("fix")
                    .long("fix")
                    .action(ArgAction::SetTrue)
                    .num_args(0)
                    .help("Correct allocated quotas and print the corrected snapshot"),
            )
            .arg(config_arg())
    }
}

impl<'a> ToolCommand<'a> for CinderQuotaCheck {
    fn name(&self) -> &'a str {
        "cinder-quota-check"
    }

    fn about(&self) -> &'a str {
        CinderQuotaCheck::ABOUT
    }

    fn run(&self, command_line_args: Vec<String>) -> Result<(), String> {
        let matches = CinderQuotaCheck::cmd().get_matches_from(command_line_args);
        let infile = matches
            .get_one::<PathBuf>("file")
            .expect("'file' is a mandatory argument");

        check_quotas::run(
            infile,
            matches.get_one::<PathBuf>("config"),
            matches.get_flag("fix"),
        )
    }
}

struct CinderQuotaShow;

impl CinderQuotaShow {
    const ABOUT: &'static str = "Print the limits and usage of a project";

    fn cmd() -> Command {
        Command::new("cinder-quota-show")
            .version(VERSION)
            .about(CinderQuotaShow::ABOUT)
            .next_line_help(true)
            .arg(
                Arg::new("file")
                    .value_parser(clap::value_parser!(PathBuf))
                    .required(true)
                    .help("File containing a quota snapshot as JSON"),
            )
            .arg(
                Arg::new("project")
                    .required(true)
                    .help("Id of the project to report on"),
            )
            .arg(
                Arg::new("nested")
                    .long("nested")
                    .action(ArgAction::SetTrue)
                    .num_args(0)
                    .help("Use nested quotas"),
            )
            .arg(config_arg())
    }
}

impl<'a> ToolCommand<'a> for CinderQuotaShow {
    fn name(&self) -> &'a str {
        "cinder-quota-show"
    }

    fn about(&self) -> &'a str {
        CinderQuotaShow::ABOUT
    }

    fn run(&self, command_line_args: Vec<String>) -> Result<(), String> {
        let matches = CinderQuotaShow::cmd().get_matches_from(command_line_args);
        let infile = matches
            .get_one::<PathBuf>("file")
            .expect("'file' is a mandatory argument");
        let project = matches
            .get_one::<String>("project")
            .expect("'project' is a mandatory argument");

        show_quotas::run(
            infile,
            project,
            matches.get_one::<PathBuf>("config"),
            matches.get_flag("nested"),
        )
    }
}

pub fn cmds<'a>() -> Vec<Box<dyn ToolCommand<'a>>> {
    vec![Box::new(CinderQuotaCheck), Box::new(CinderQuotaShow)]
}
