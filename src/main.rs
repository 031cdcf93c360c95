//! Main entry point for the zipkit CLI application.
//!
//! Lists and extracts archives the way `unzip` does, and creates or updates
//! them with `-a`.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use zipkit::{Cli, ExtractOptions, ExtractOutcome, ZipEntry, ZipFile, ZipSettings};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to creation, listing or
/// extraction.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.is_update() {
        return update_archive(&cli);
    }

    let settings = ZipSettings {
        password: cli.password.clone(),
        ..ZipSettings::default()
    };
    let mut zip = ZipFile::open_with(&cli.file, settings)
        .with_context(|| format!("cannot open {}", cli.file))?;

    if cli.list || cli.verbose {
        list_files(&zip, cli.verbose);
        return Ok(());
    }
    extract_files(&mut zip, &cli)
}

/// `RUST_LOG` wins; otherwise warnings only, or info with `-v`.
fn init_logging(verbose: bool) {
    let default = if verbose { "zipkit=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Create the archive, or open it, then add or replace every `-a` path and save.
fn update_archive(cli: &Cli) -> Result<()> {
    let mut settings = ZipSettings {
        password: cli.password.clone(),
        zip64: cli.zip64.into(),
        ..ZipSettings::default()
    };
    if let Some(method) = cli.encrypt {
        settings.encryption = method.into();
    }
    if let Some(level) = cli.compression_level() {
        settings.compression_level = level;
    }

    let mut zip = if Path::new(&cli.file).exists() {
        ZipFile::open_with(&cli.file, settings).with_context(|| format!("cannot open {}", cli.file))?
    } else {
        let mut zip = ZipFile::create(&cli.file);
        *zip.settings_mut() = settings;
        zip
    };

    for item in &cli.add {
        let path = Path::new(item);
        // Directories keep their own name as the top level inside the archive.
        let dir = if path.is_dir() {
            path.file_name().map(|n| n.to_string_lossy().into_owned())
        } else {
            None
        };
        let summary = zip
            .update_item(path, dir.as_deref())
            .with_context(|| format!("cannot add {item}"))?;
        if !cli.is_quiet() {
            println!(
                "  adding: {item} ({} new, {} updated)",
                summary.added, summary.updated
            );
        }
    }
    if let Some(comment) = &cli.comment {
        zip.set_comment(comment.clone());
    }

    zip.save().with_context(|| format!("cannot write {}", cli.file))?;
    if !cli.is_very_quiet() {
        eprintln!("{}: {} entries", cli.file, zip.len());
    }
    Ok(())
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
fn list_files(zip: &ZipFile, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in zip.entries() {
        if !verbose {
            println!("{}", entry.name());
            continue;
        }
        println!(
            "{:>10}  {:>10}  {:>4.0}%  {}  {}{}",
            entry.uncompressed_size(),
            entry.compressed_size(),
            entry.compression_ratio(),
            entry.last_modified().format("%Y-%m-%d  %H:%M"),
            entry.name(),
            if entry.uses_encryption() { " (encrypted)" } else { "" }
        );
        if !entry.is_directory() {
            total_uncompressed += entry.uncompressed_size();
            total_compressed += entry.compressed_size();
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        let total_ratio = if total_uncompressed > 0 {
            100.0 - (total_compressed as f64 * 100.0 / total_uncompressed as f64)
        } else {
            0.0
        };
        println!(
            "{:>10}  {:>10}  {:>4.0}%  {:>18}  {} files",
            total_uncompressed, total_compressed, total_ratio, "", file_count
        );
        if !zip.comment().is_empty() {
            println!("{}", zip.comment());
        }
    }
}

/// Whether an entry is selected by the positional names and not excluded by `-x`.
fn is_selected(entry: &ZipEntry, cli: &Cli) -> bool {
    let name = entry.name();
    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, name)
            } else {
                let basename = Path::new(name)
                    .file_name()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                name == f.as_str() || basename == *f
            }
        });
        if !matches {
            return false;
        }
    }
    !cli.exclude.iter().any(|x| name.contains(x.as_str()) || glob_match(x, name))
}

/// Extract the selected entries, or write them to stdout with `-p`.
fn extract_files(zip: &mut ZipFile, cli: &Cli) -> Result<()> {
    let names: Vec<String> = zip
        .entries()
        .filter(|e| is_selected(e, cli) && !(cli.pipe && e.is_directory()))
        .map(|e| e.name().to_string())
        .collect();

    if cli.pipe {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let show_filename = names.len() > 1;
        for name in &names {
            if show_filename {
                writeln!(out, "--- {name} ---")?;
            }
            zip.extract_to_writer(name, &mut out)
                .with_context(|| format!("cannot extract {name}"))?;
        }
        out.flush()?;
        return Ok(());
    }

    let base = cli.extract_dir.as_deref().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let mut options = ExtractOptions::new()
        .existing(cli.existing_action())
        .flatten(cli.junk_paths);
    if let Some(password) = &cli.password {
        options = options.password(password.clone());
    }

    for name in &names {
        let outcome = zip
            .extract_with(name, &base, &options)
            .with_context(|| format!("cannot extract {name}"))?;
        if cli.is_quiet() {
            continue;
        }
        match outcome {
            ExtractOutcome::Written => println!("  extracting: {name}"),
            ExtractOutcome::Directory if !cli.junk_paths => println!("   creating: {name}"),
            ExtractOutcome::Directory => {}
            ExtractOutcome::Skipped if cli.never_overwrite => eprintln!("Skipping: {name} (file exists)"),
            ExtractOutcome::Skipped => eprintln!("Skipping: {name} (use -o to overwrite)"),
        }
    }
    Ok(())
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching with `*` (any run of characters) and `?` (one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // Position of the last `*` and the text index it was tried against.
    let mut star: Option<(usize, usize)> = None;
    let (mut p, mut t) = (0, 0);
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    star = Some((sp, st + 1));
                    p = sp + 1;
                    t = st + 1;
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
