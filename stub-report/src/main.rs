use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use bytecoder::StubSummary;
use serde::Serialize;
use zip::ZipArchive;

/// Stubs grouped by the class declaring them; `BTreeMap` keeps classes sorted.
#[derive(Serialize, Debug, Default)]
struct StubReport {
    stub_count: usize,
    classes: BTreeMap<String, Vec<StubSummary>>,
}

impl StubReport {
    fn add(&mut self, origin: &str, class_data: &[u8]) -> Result<(), String> {
        let stubs = bytecoder::inspect(class_data)
            .map_err(|e| format!("Failed to inspect '{}': {}", origin, e))?;
        for stub in stubs {
            self.stub_count += 1;
            self.classes.entry(stub.class.clone()).or_default().push(stub);
        }
        Ok(())
    }

    fn finish(&mut self) {
        for stubs in self.classes.values_mut() {
            stubs.sort_by(|a, b| (&a.method, &a.descriptor).cmp(&(&b.method, &b.descriptor)));
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut inputs: Vec<PathBuf> = Vec::new();
    let mut output_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        if args[i] == "-o" {
            match args.get(i + 1) {
                Some(path) => output_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("Error: -o flag requires an output file path");
                    exit(1);
                }
            }
            i += 2;
        } else {
            inputs.push(PathBuf::from(&args[i]));
            i += 1;
        }
    }

    if inputs.is_empty() {
        eprintln!(
            "Usage: {} <classes-dir | file.class | file.jar>... [-o report.json]",
            args[0]
        );
        exit(1);
    }

    match generate_report(&inputs, output_path.as_deref()) {
        Ok(count) => eprintln!("Found {} stub methods.", count),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}

fn generate_report(inputs: &[PathBuf], output_path: Option<&Path>) -> Result<usize, String> {
    let mut report = StubReport::default();
    for input in inputs {
        scan(input, &mut report)?;
    }
    report.finish();

    let json_output = serde_json::to_string_pretty(&report)
        .map_err(|e| format!("Failed to serialize report to JSON: {}", e))?;

    match output_path {
        Some(path) => {
            let mut output_file = fs::File::create(path)
                .map_err(|e| format!("Failed to create output file {:?}: {}", path, e))?;
            output_file
                .write_all(json_output.as_bytes())
                .map_err(|e| format!("Failed to write JSON to {:?}: {}", path, e))?;
        }
        None => println!("{}", json_output),
    }

    Ok(report.stub_count)
}

fn scan(path: &Path, report: &mut StubReport) -> Result<(), String> {
    if path.is_dir() {
        let mut entries = fs::read_dir(path)
            .map_err(|e| format!("Failed to read directory {:?}: {}", path, e))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Failed to read directory {:?}: {}", path, e))?;
        entries.sort();
        for entry in entries {
            if entry.is_dir() || has_extension(&entry, "class") || has_extension(&entry, "jar") {
                scan(&entry, report)?;
            }
        }
        Ok(())
    } else if has_extension(path, "jar") {
        scan_jar(path, report)
    } else {
        let class_data =
            fs::read(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
        report.add(&path.display().to_string(), &class_data)
    }
}

fn scan_jar(jar_path: &Path, report: &mut StubReport) -> Result<(), String> {
    let file = fs::File::open(jar_path)
        .map_err(|e| format!("Failed to open JAR file {:?}: {}", jar_path, e))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| format!("Failed to read JAR archive {:?}: {}", jar_path, e))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("Failed to read entry {} of {:?}: {}", i, jar_path, e))?;
        if !entry.name().ends_with(".class") {
            continue;
        }
        let name = entry.name().to_string();
        let mut class_data = Vec::new();
        entry
            .read_to_end(&mut class_data)
            .map_err(|e| format!("Failed to read '{}' from JAR: {}", name, e))?;
        report.add(&format!("{}!{}", jar_path.display(), name), &class_data)?;
    }
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext == extension)
}
