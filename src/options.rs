//! Parsing Options.
//! `pn-synth [OPTIONS] <INPUT>`；额外的选项可以通过环境变量 `PN_SYNTH_FLAGS` 给出。

use std::error::Error;
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

use crate::properties::PnProperties;
use crate::synthesis::SynthesisFlags;

/// Format of the input transition system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// APT-style `.lts` text.
    Lts,
    Json,
    Ron,
}

impl InputFormat {
    /// Guesses the format from the file extension, defaulting to `.lts`.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => InputFormat::Json,
            Some("ron") => InputFormat::Ron,
            _ => InputFormat::Lts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Ron,
    Dot,
    /// Human readable synthesis report instead of the net.
    Report,
}

fn make_options_parser() -> clap::Command {
    Command::new("pn-synth")
        .no_binary_name(true)
        .version("v0.1.0")
        .about("Synthesizes a Petri net whose reachability graph is the given transition system")
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Transition system in .lts, .json or .ron format")
                .required(false),
        )
        .arg(
            Arg::new("input-format")
                .short('i')
                .long("input-format")
                .help("Overrides the input format guessed from the extension")
                .value_parser(["lts", "json", "ron"]),
        )
        .arg(
            Arg::new("properties")
                .short('p')
                .long("properties")
                .help("Comma separated target properties, e.g. `safe,pure,marked-graph`")
                .default_value("none"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .help("Output format")
                .default_value("json")
                .value_parser(["json", "ron", "dot", "report"]),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Path to file where the result will be stored (stdout if absent)"),
        )
        .arg(
            Arg::new("report")
                .short('r')
                .long("report")
                .value_name("FILE")
                .help("Also store the synthesis report in FILE and FILE.json"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file")
                .default_value("pn-synth.toml"),
        )
        .arg(
            Arg::new("quick-fail")
                .long("quick-fail")
                .help("Stop at the first unsolved separation problem")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("only-events")
                .long("only-events")
                .help("Skip state separation")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("minimize")
                .short('m')
                .long("minimize")
                .help("Search for a net with the fewest places")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log every region found")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("language")
                .short('l')
                .long("language")
                .help("Synthesize up to language equivalence")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("overapproximate")
                .long("overapproximate")
                .help("Relax the input until it becomes synthesizable")
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub input: Option<PathBuf>,
    pub input_format: Option<InputFormat>,
    pub properties: PnProperties,
    pub flags: SynthesisFlags,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub config: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            input: None,
            input_format: None,
            properties: PnProperties::new(),
            flags: SynthesisFlags::empty(),
            format: OutputFormat::Json,
            output: None,
            report: None,
            config: PathBuf::from("pn-synth.toml"),
        }
    }
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    pub fn parse_from_args(flags: &[String]) -> Result<Self, Box<dyn Error>> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;

        let input = matches.get_one::<String>("input").map(PathBuf::from);
        let input_format = match matches.get_one::<String>("input-format").map(String::as_str) {
            Some("lts") => Some(InputFormat::Lts),
            Some("json") => Some(InputFormat::Json),
            Some("ron") => Some(InputFormat::Ron),
            None => None,
            Some(other) => return Err(format!("unsupported input format `{other}`"))?,
        };
        let properties = matches
            .get_one::<String>("properties")
            .map(|p| p.parse::<PnProperties>())
            .transpose()?
            .unwrap_or_default();
        let format = match matches.get_one::<String>("format").map(String::as_str) {
            Some("json") | None => OutputFormat::Json,
            Some("ron") => OutputFormat::Ron,
            Some("dot") => OutputFormat::Dot,
            Some("report") => OutputFormat::Report,
            Some(other) => return Err(format!("unsupported output format `{other}`"))?,
        };

        let mut flags = SynthesisFlags::empty();
        for (name, flag) in [
            ("quick-fail", SynthesisFlags::QUICK_FAIL),
            ("only-events", SynthesisFlags::ONLY_EVENTS),
            ("minimize", SynthesisFlags::MINIMIZE),
            ("verbose", SynthesisFlags::VERBOSE),
            ("language", SynthesisFlags::LANGUAGE_EQUIVALENCE),
            ("overapproximate", SynthesisFlags::OVERAPPROXIMATE),
        ] {
            if matches.get_flag(name) {
                flags |= flag;
            }
        }

        let output = matches.get_one::<String>("output").map(PathBuf::from);
        let report = matches.get_one::<String>("report").map(PathBuf::from);
        let config = matches
            .get_one::<String>("config")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("pn-synth.toml"));
        Ok(Options {
            input,
            input_format,
            properties,
            flags,
            format,
            output,
            report,
            config,
        })
    }

    /// Fills everything `other` leaves at its default from `self`.
    ///
    /// Used to layer command line arguments over `PN_SYNTH_FLAGS`.
    pub fn merge(self, other: Options) -> Options {
        let defaults = Options::default();
        Options {
            input: other.input.or(self.input),
            input_format: other.input_format.or(self.input_format),
            properties: if other.properties.is_empty() {
                self.properties
            } else {
                other.properties
            },
            flags: self.flags | other.flags,
            format: if other.format == defaults.format {
                self.format
            } else {
                other.format
            },
            output: other.output.or(self.output),
            report: other.report.or(self.report),
            config: if other.config == defaults.config {
                self.config
            } else {
                other.config
            },
        }
    }

    pub fn input_format(&self) -> InputFormat {
        self.input_format.unwrap_or_else(|| {
            self.input
                .as_deref()
                .map_or(InputFormat::Lts, InputFormat::from_path)
        })
    }
}
