#![warn(non_snake_case)]

use std::io::Read;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use log::debug;

use pn_synth::cancel::CancelToken;
use pn_synth::config::SynthConfig;
use pn_synth::net::io::{from_json_str, from_ron_str, to_json_string, to_ron_string};
use pn_synth::options::{InputFormat, Options, OutputFormat};
use pn_synth::report::SynthesisReport;
use pn_synth::synthesis::synthesize;
use pn_synth::ts::{TransitionSystem, TsDescription, parse_lts};

const EXIT_SUCCESS: i32 = 0;
const EXIT_UNSYNTHESIZABLE: i32 = 1;
const EXIT_FAILURE: i32 = 2;

fn main() {
    if std::env::var("PN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("PN_LOG")
            .write_style("PN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let env_options = match Options::parse_from_str(&std::env::var("PN_SYNTH_FLAGS").unwrap_or_default()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("invalid PN_SYNTH_FLAGS: {err}");
            std::process::exit(EXIT_FAILURE);
        }
    };
    debug!("options from environment: {:?}", env_options);

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let options = match Options::parse_from_args(&args) {
        Ok(options) => env_options.merge(options),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(EXIT_FAILURE);
        }
    };
    debug!("options: {:?}", options);

    let exit_code = match run(&options) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:?}");
            EXIT_FAILURE
        }
    };
    std::process::exit(exit_code);
}

fn read_input(options: &Options) -> Result<TransitionSystem> {
    let source = match &options.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("failed to read standard input")?;
            source
        }
    };
    let ts = match options.input_format() {
        InputFormat::Lts => parse_lts(&source)?,
        InputFormat::Json => TransitionSystem::try_from(from_json_str::<TsDescription>(&source)?)?,
        InputFormat::Ron => TransitionSystem::try_from(from_ron_str::<TsDescription>(&source)?)?,
    };
    Ok(ts)
}

fn write_output(options: &Options, text: &str) -> Result<()> {
    match &options.output {
        Some(path) => write_file(path, text),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn write_file(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn run(options: &Options) -> Result<i32> {
    let config = SynthConfig::load_from_file(&options.config)?;
    let ts = read_input(options)?;
    log::info!(
        "loaded {} with {} states and {} arcs",
        ts.name(),
        ts.state_count(),
        ts.arc_count()
    );

    let cancel = CancelToken::new();
    let start = Instant::now();
    let result = synthesize(&ts, options.properties, options.flags, &config, &cancel)
        .context("synthesis failed")?;
    let report = SynthesisReport::from_result("pn-synth".to_string(), &result, start.elapsed());
    if let Some(path) = &options.report {
        report
            .save_to_file(path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }
    if result.inconclusive() > 0 {
        log::warn!(
            "the constraint backend gave up on {} separation instances",
            result.inconclusive()
        );
    }

    let text = match options.format {
        OutputFormat::Report => Some(report.to_string()),
        _ if !result.is_success() => None,
        OutputFormat::Json => Some(to_json_string(&result.to_net()?)?),
        OutputFormat::Ron => Some(to_ron_string(&result.to_net()?)?),
        OutputFormat::Dot => Some(result.to_net()?.to_dot()),
    };
    match text {
        Some(text) => write_output(options, &text)?,
        None => eprint!("{report}"),
    }
    Ok(if result.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_UNSYNTHESIZABLE
    })
}
