// bytecoder-cli/src/build.rs

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use bytecoder::Transformer;
use regex::Regex;
use tempfile::NamedTempFile;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

use crate::state::{self, BuildState, STATE_FILE_NAME, Status};

/// Settings shared by directory and jar builds.
pub struct Build<'a> {
    pub transformer: &'a Transformer,
    /// Only classes whose relative path matches are rewritten.
    pub include: Option<&'a Regex>,
}

/// Counts reported at the end of a build.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub rewritten: usize,
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl Build<'_> {
    fn should_rewrite(&self, relative_path: &str) -> bool {
        relative_path.ends_with(".class")
            && self
                .include
                .is_none_or(|pattern| pattern.is_match(relative_path))
    }

    /// Digest of everything besides the inputs that shapes the outputs.
    fn settings_digest(&self) -> io::Result<String> {
        let config = serde_json::to_string(self.transformer.config())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let include = self.include.map_or("", Regex::as_str);
        Ok(state::digest(format!("{config}\n{include}").as_bytes()))
    }

    /// Runs one class through the transformer, naming it in any failure.
    fn rewrite(&self, relative_path: &str, contents: &[u8]) -> io::Result<Vec<u8>> {
        self.transformer
            .transform(contents)
            .map_err(|err| {
                io::Error::new(io::ErrorKind::InvalidData, format!("{relative_path}: {err}"))
            })
    }

    /// Rewrites `input` into `output`, mirroring the directory tree.
    ///
    /// A full build starts from an empty `output`; an incremental one only
    /// touches the inputs that were added, changed or removed since the
    /// state recorded by the previous build.
    pub fn directory(
        &self,
        input: &Path,
        output: &Path,
        incremental: bool,
    ) -> io::Result<BuildSummary> {
        check_output_outside_input(input, output)?;
        let settings = self.settings_digest()?;

        let mut previous = if incremental {
            BuildState::load(output)?
        } else {
            BuildState::default()
        };
        if previous.settings != settings {
            if incremental && !previous.files.is_empty() {
                breadcrumbs::log!(
                    breadcrumbs::LogLevel::Warn,
                    "build",
                    "Build settings changed since the last run, rebuilding everything".to_string()
                );
            }
            if output.exists() {
                fs::remove_dir_all(output)?;
            }
            previous = BuildState::default();
        }
        fs::create_dir_all(output)?;

        let mut files = Vec::new();
        collect_files(input, input, &mut files)?;

        let mut current = BuildState {
            settings,
            ..BuildState::default()
        };
        for (relative_path, path) in &files {
            current.record(relative_path, &fs::read(path)?);
        }

        let mut summary = BuildSummary::default();
        for (relative_path, status) in previous.classify(&current) {
            let destination = output.join(&relative_path);
            match status {
                Status::NotChanged => summary.unchanged += 1,
                Status::Removed => {
                    breadcrumbs::log!(
                        breadcrumbs::LogLevel::Info,
                        "build",
                        format!("Removing {relative_path}")
                    );
                    match fs::remove_file(&destination) {
                        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
                        _ => summary.removed += 1,
                    }
                }
                Status::Added | Status::Changed => {
                    let contents = fs::read(input.join(&relative_path))?;
                    if self.should_rewrite(&relative_path) {
                        breadcrumbs::log!(
                            breadcrumbs::LogLevel::Info,
                            "build",
                            format!("Processing {relative_path} ({status:?})")
                        );
                        let rewritten = self.rewrite(&relative_path, &contents)?;
                        crate::write_atomically(&destination, &rewritten)?;
                        summary.rewritten += 1;
                    } else {
                        crate::write_atomically(&destination, &contents)?;
                        summary.copied += 1;
                    }
                }
            }
        }

        current.save(output)?;
        remove_empty_dirs(output)?;
        Ok(summary)
    }

    /// Rewrites the class entries of `input` into a new jar at `output`,
    /// copying every other entry unchanged.
    pub fn jar(&self, input: &Path, output: &Path) -> io::Result<BuildSummary> {
        let mut archive = ZipArchive::new(fs::File::open(input)?)?;
        let parent = output
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let temp = NamedTempFile::new_in(parent)?;

        let mut zip_writer = ZipWriter::new(temp.as_file());
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::DEFLATE)
            .unix_permissions(0o644);

        let mut summary = BuildSummary::default();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            if entry.is_dir() {
                zip_writer.add_directory(name, options)?;
                continue;
            }
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;

            let contents = if self.should_rewrite(&name) {
                breadcrumbs::log!(
                    breadcrumbs::LogLevel::Info,
                    "build",
                    format!("Processing {name} from {}", input.display())
                );
                summary.rewritten += 1;
                self.rewrite(&name, &contents)?
            } else {
                summary.copied += 1;
                contents
            };
            zip_writer.start_file(name, options)?;
            zip_writer.write_all(&contents)?;
        }
        zip_writer.finish()?;

        temp.persist(output).map_err(|err| err.error)?;
        Ok(summary)
    }
}

/// Refuses an `output` that is `input` itself or one of its ancestors.
fn check_output_outside_input(input: &Path, output: &Path) -> io::Result<()> {
    if !output.exists() {
        return Ok(());
    }
    let input = fs::canonicalize(input)?;
    let output = fs::canonicalize(output)?;
    if input.starts_with(&output) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "output directory {} must not contain the input directory {}",
                output.display(),
                input.display()
            ),
        ));
    }
    Ok(())
}

/// Lists every regular file under `dir` with its `/`-separated path relative
/// to `root`, in a stable order.
fn collect_files(root: &Path, dir: &Path, files: &mut Vec<(String, PathBuf)>) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);
    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, files)?;
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let relative_path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if relative_path != STATE_FILE_NAME {
            files.push((relative_path, path));
        }
    }
    Ok(())
}

/// Drops directories left empty by removed inputs.
fn remove_empty_dirs(dir: &Path) -> io::Result<bool> {
    let mut empty = true;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && remove_empty_dirs(&entry.path())? {
            fs::remove_dir(entry.path())?;
        } else {
            empty = false;
        }
    }
    Ok(empty)
}
