// bytecoder-cli/src/main.rs

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use breadcrumbs::{Log, LogLevel, LogListener};
use bytecoder::{Config, Transformer};
use regex::Regex;
use tempfile::NamedTempFile;

mod build;
mod state;

use build::Build;

const USAGE: &str = concat!(
    "Usage: bytecoder [--incremental] [--include <regex>] [--config <file.json>] [--verbose] ",
    "<input_dir> <output_dir>\n",
    "       bytecoder --jar [--include <regex>] [--config <file.json>] [--verbose] ",
    "<input.jar> <output.jar>",
);

/// Prints library and build logs to stderr.
struct StderrListener {
    verbose: bool,
}

impl LogListener for StderrListener {
    fn on_log(&mut self, log: Log) {
        if self.verbose || log.level.is_at_least(LogLevel::Warn) {
            eprintln!("{log}");
        }
        log.remove();
    }
}

struct Options {
    input: PathBuf,
    output: PathBuf,
    jar: bool,
    incremental: bool,
    include: Option<Regex>,
    config_path: Option<PathBuf>,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut jar = false;
    let mut incremental = false;
    let mut include = None;
    let mut config_path = None;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--jar" => jar = true,
            "--incremental" => incremental = true,
            "--verbose" | "-v" => verbose = true,
            "--include" => {
                let pattern = args
                    .get(i + 1)
                    .ok_or("--include flag requires a regular expression")?;
                include = Some(
                    Regex::new(pattern)
                        .map_err(|err| format!("invalid --include pattern: {err}"))?,
                );
                i += 1;
            }
            "--config" => {
                let path = args.get(i + 1).ok_or("--config flag requires a path")?;
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            _ if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            _ => paths.push(PathBuf::from(arg)),
        }
        i += 1;
    }

    if jar && incremental {
        return Err("--incremental only applies to directory builds".to_string());
    }
    let [input, output]: [PathBuf; 2] = paths
        .try_into()
        .map_err(|_| "expected exactly one input and one output path".to_string())?;

    Ok(Options {
        input,
        output,
        jar,
        incremental,
        include,
        config_path,
        verbose,
    })
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let json = fs::read_to_string(path)
        .map_err(|err| format!("cannot read config {}: {err}", path.display()))?;
    Config::from_json(&json).map_err(|err| format!("invalid config {}: {err}", path.display()))
}

/// Writes `contents` next to `path` first and moves it into place, so a
/// failure never leaves a truncated file behind.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn main() -> Result<(), i32> {
    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!("{USAGE}");
            return Err(1);
        }
    };

    breadcrumbs::init!(StderrListener {
        verbose: options.verbose
    });

    let config = match load_config(options.config_path.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            return Err(1);
        }
    };
    let transformer = Transformer::new(config);
    let build = Build {
        transformer: &transformer,
        include: options.include.as_ref(),
    };

    let result = if options.jar {
        build.jar(&options.input, &options.output)
    } else {
        if !options.input.is_dir() {
            eprintln!(
                "Error: input directory does not exist: {}",
                options.input.display()
            );
            return Err(1);
        }
        build.directory(&options.input, &options.output, options.incremental)
    };

    match result {
        Ok(summary) => {
            println!(
                "{} rewritten, {} copied, {} unchanged, {} removed -> {}",
                summary.rewritten,
                summary.copied,
                summary.unchanged,
                summary.removed,
                options.output.display()
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("Error: {err}");
            Err(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("bytecoder")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_directory_build() {
        let options = parse_args(&args(&[
            "--incremental",
            "--include",
            "^com/",
            "classes",
            "out",
        ]))
        .unwrap();
        assert!(options.incremental);
        assert!(!options.jar);
        assert_eq!(options.input, PathBuf::from("classes"));
        assert_eq!(options.output, PathBuf::from("out"));
        assert!(options.include.unwrap().is_match("com/A.class"));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(&args(&["only-one"])).is_err());
        assert!(parse_args(&args(&["--jar", "--incremental", "a.jar", "b.jar"])).is_err());
        assert!(parse_args(&args(&["--include", "(", "a", "b"])).is_err());
        assert!(parse_args(&args(&["--bogus", "a", "b"])).is_err());
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bytecoder.json");
        fs::write(&path, r#"{"annotation_package": "org.example.markers"}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.annotation_package, "org.example.markers");
        assert_eq!(config.link_failure_class, Config::default().link_failure_class);
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/File.class");
        write_atomically(&path, b"first").unwrap();
        write_atomically(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
