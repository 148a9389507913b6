#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]

use std::io::Write as _;
use std::path::Path;
use std::process::ExitCode;

mod authors;
mod branches;
mod cli;
mod convert;
mod git;
mod submodule;
mod svn;
mod term_out;

use term_out::ProgressPrint;

pub(crate) type FHashMap<K, V> = ahash::AHashMap<K, V>;

struct RunError;

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError) => ExitCode::from(1),
    }
}

fn main_inner() -> Result<(), RunError> {
    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    Ok(())
                }
                _ => Err(RunError),
            };
        }
    };

    let term_out = term_out::init(!args.no_progress && !args.quiet);
    let progress_print = term_out.get_progress_print();

    let stderr_log_level = args
        .stderr_log_level
        .map(cli::LogLevel::to_tracing_level)
        .unwrap_or(if args.debug {
            tracing::Level::DEBUG
        } else if args.verbose {
            tracing::Level::INFO
        } else if args.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::WARN
        });
    let file_log_level = args.file_log_level.map(cli::LogLevel::to_tracing_level);

    if let Err(e) = init_logger(
        stderr_log_level,
        args.log_file.as_deref(),
        file_log_level,
        progress_print.clone(),
    ) {
        eprintln!("failed to initialize logging: {e}");
        return Err(RunError);
    }

    let r = match &args.command {
        cli::Command::Print { dump_file } => cmd_print(dump_file),
        cli::Command::Authors { dump_file } => cmd_authors(dump_file),
        cli::Command::Branches { dump_file } => cmd_branches(dump_file),
        cli::Command::Scan { dump_file } => cmd_scan(&progress_print, dump_file, args.verify),
        cli::Command::GitTest { repo_dir } => cmd_git_test(repo_dir),
        cli::Command::Convert { dump_file, target } => {
            cmd_convert(&args, &progress_print, dump_file, target.as_deref())
        }
    };

    term_out.finish();
    r
}

fn cmd_convert(
    args: &cli::Cli,
    progress_print: &ProgressPrint,
    dump_file: &Path,
    target: Option<&Path>,
) -> Result<(), RunError> {
    // Load the assistance tables the user provided, validating them as much
    // as possible before wasting time on a doomed conversion.
    let mut config_errors = 0_usize;

    let authors = match &args.authors_file {
        None => authors::Authors::new(),
        Some(path) => {
            let mut reader = open_table(path)?;
            let (authors, errors) = authors::Authors::load(&mut reader).map_err(|e| {
                tracing::error!("failed to read {path:?}: {e}");
                RunError
            })?;
            config_errors += errors;
            authors
        }
    };

    let branch_defs = match &args.branches_file {
        None => Vec::new(),
        Some(path) => {
            let mut reader = open_table(path)?;
            let (defs, errors) = branches::load(&mut reader).map_err(|e| {
                tracing::error!("failed to read {path:?}: {e}");
                RunError
            })?;
            config_errors += errors;
            defs
        }
    };

    let module_defs = match &args.modules_file {
        None => submodule::SubmoduleDefs::default(),
        Some(path) => {
            let mut reader = open_table(path)?;
            let (defs, errors) = submodule::load(&mut reader).map_err(|e| {
                tracing::error!("failed to read {path:?}: {e}");
                RunError
            })?;
            config_errors += errors;
            defs
        }
    };

    if config_errors > 0 {
        tracing::error!("{config_errors} problems in the configuration tables");
        return Err(RunError);
    }

    let options = convert::Options {
        skip_prescan: args.skip,
        start: args.start,
        cutoff: args.cutoff,
        collect: args.gc,
    };

    let current_dir;
    let target = match target {
        Some(target) => target,
        None => {
            current_dir = std::env::current_dir().map_err(|e| {
                tracing::error!("failed to get current directory: {e}");
                RunError
            })?;
            &current_dir
        }
    };

    convert::run(
        progress_print,
        &options,
        &authors,
        &branch_defs,
        &module_defs,
        dump_file,
        target,
    )
    .map_err(|convert::ConvertError| RunError)
}

fn open_table(path: &Path) -> Result<std::io::BufReader<std::fs::File>, RunError> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| {
            tracing::error!("failed to open {path:?}: {e}");
            RunError
        })?;
    Ok(std::io::BufReader::new(file))
}

fn open_dump(dump_file: &Path) -> Result<svn::source::DumpSource, RunError> {
    svn::source::DumpSource::open(dump_file).map_err(|e| {
        tracing::error!("failed to open SVN dump source: {e}");
        RunError
    })
}

fn cmd_print(dump_file: &Path) -> Result<(), RunError> {
    let mut source = open_dump(dump_file)?;
    let mut stream = svn::dump::NodeStream::new(source.stream(), true).map_err(|e| {
        tracing::error!("failed to read SVN dump: {e}");
        RunError
    })?;

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    loop {
        let node = match stream.next_node() {
            Ok(Some(node)) => node,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("failed to read SVN dump record: {e}");
                return Err(RunError);
            }
        };

        let mut line = format!(
            "r{}: {} \"{}\"",
            node.rev,
            node.describe(),
            node.path.escape_ascii(),
        );
        if let Some(copy_from) = &node.copy_from {
            line.push_str(&format!(
                " (from \"{}\"@r{})",
                copy_from.path.escape_ascii(),
                copy_from.rev,
            ));
        }
        if writeln!(stdout, "{line}").is_err() {
            return Err(RunError);
        }
    }

    close_dump(source)
}

fn cmd_authors(dump_file: &Path) -> Result<(), RunError> {
    let mut source = open_dump(dump_file)?;
    let mut stream = svn::dump::NodeStream::new(source.stream(), true).map_err(|e| {
        tracing::error!("failed to read SVN dump: {e}");
        RunError
    })?;

    let counts = authors::scan_authors(&mut stream).map_err(|e| {
        tracing::error!("failed to read SVN dump record: {e}");
        RunError
    })?;
    close_dump(source)?;

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    for (id, count) in counts {
        if writeln!(stdout, "{}\t\t\t{count}", id.escape_ascii()).is_err() {
            return Err(RunError);
        }
    }
    Ok(())
}

fn cmd_branches(dump_file: &Path) -> Result<(), RunError> {
    let mut source = open_dump(dump_file)?;
    let mut stream = svn::dump::NodeStream::new(source.stream(), true).map_err(|e| {
        tracing::error!("failed to read SVN dump: {e}");
        RunError
    })?;

    let detected = branches::scan_branches(&mut stream).map_err(|e| {
        tracing::error!("failed to read SVN dump record: {e}");
        RunError
    })?;
    close_dump(source)?;

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    for (prefix, info) in detected {
        let kind = if info.changes == 1 { "tag" } else { "branch" };
        let date = chrono::DateTime::from_timestamp(info.last_date, 0)
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let row = format!(
            "{kind}\t{}\t{date}\t{}\t{}\t{}",
            info.last_rev,
            info.changes,
            prefix.escape_ascii(),
            prefix.escape_ascii(),
        );
        if writeln!(stdout, "{row}").is_err() {
            return Err(RunError);
        }
    }
    Ok(())
}

fn cmd_scan(
    progress_print: &ProgressPrint,
    dump_file: &Path,
    verify: bool,
) -> Result<(), RunError> {
    let mut source = open_dump(dump_file)?;
    let mut stream = svn::dump::NodeStream::new(source.stream(), !verify).map_err(|e| {
        tracing::error!("failed to read SVN dump: {e}");
        RunError
    })?;

    let mut errors = 0_usize;
    loop {
        let node = match stream.next_node() {
            Ok(Some(node)) => node,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("failed to read SVN dump record: {e}");
                return Err(RunError);
            }
        };
        progress_print.set_progress(convert::progress_line(
            "Scanning",
            node.rev,
            stream.final_rev(),
        ));
        if verify {
            errors += convert::verify_text(&node);
        }
    }
    close_dump(source)?;
    progress_print.finish_progress();

    if errors > 0 {
        tracing::error!("{errors} problems found in the dump");
        return Err(RunError);
    }
    Ok(())
}

fn cmd_git_test(repo_dir: &Path) -> Result<(), RunError> {
    let mut repo = git::Repository::open(repo_dir, String::new()).map_err(|e| {
        tracing::error!("failed to open repository {repo_dir:?}: {e}");
        RunError
    })?;
    let writer_err = |e: git::WriterError| {
        tracing::error!("git writer failure: {e}");
        RunError
    };

    eprintln!("Creating initial commit...");
    let feature = repo.add_branch(git::Branch::new("feature".into(), None, false));
    let baz = repo
        .store
        .create_blob(b"baz.c".to_vec(), b"#include <stdio.h>\n", false)
        .map_err(writer_err)?;
    let bar = repo
        .store
        .create_blob(b"bar.c".to_vec(), b"#include <stdlib.h>\n", false)
        .map_err(writer_err)?;

    eprintln!("Adding blobs to commit...");
    let commit = repo.get_commit(feature, None);
    commit.update(b"foo/bar/baz.c", git::Object::Blob(baz));
    commit.update(b"foo/bar/bar.c", git::Object::Blob(bar));

    eprintln!("Updating feature branch...");
    repo.write_queue(1, &test_meta("2005-04-07T22:13:13Z", "This is a sample commit.\n"))
        .map_err(writer_err)?;

    eprintln!("Cloning commit and removing a file...");
    let master = repo.add_branch(git::Branch::new("master".into(), None, false));
    let commit = repo.get_commit(master, Some(feature));
    commit.remove(b"foo/bar/baz.c");

    eprintln!("Updating master branch...");
    repo.write_queue(2, &test_meta("2005-04-10T22:13:13Z", "This removes the previous file.\n"))
        .map_err(writer_err)?;

    repo.write_branches().map_err(writer_err)?;
    Ok(())
}

fn test_meta(date: &str, message: &str) -> git::CommitMeta {
    let seconds = chrono::DateTime::parse_from_rfc3339(date)
        .expect("valid test date")
        .timestamp();
    git::CommitMeta {
        signature: gix_actor::Signature {
            name: "John Wiegley".into(),
            email: "johnw@boostpro.com".into(),
            time: gix_date::Time {
                seconds,
                offset: 0,
                sign: gix_date::time::Sign::Plus,
            },
        },
        message: message.as_bytes().to_vec(),
    }
}

fn close_dump(source: svn::source::DumpSource) -> Result<(), RunError> {
    source.close().map_err(|e| {
        tracing::error!("SVN dump source error: {e}");
        RunError
    })
}

fn init_logger(
    stderr_level: tracing::Level,
    file_path: Option<&Path>,
    file_level: Option<tracing::Level>,
    progress_print: ProgressPrint,
) -> Result<(), std::io::Error> {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let stderr_sub = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .with_writer(MakeLogPrinter::new(progress_print))
        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
            stderr_level,
        ));

    let file_sub = if let Some(file_path) = file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let filter = tracing_subscriber::filter::LevelFilter::from_level(
            file_level.unwrap_or(tracing::Level::DEBUG),
        );
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_sub)
        .with(file_sub)
        .init();

    Ok(())
}

// Routes formatted log lines through the status-line thread so they do not
// tear the progress display.
struct MakeLogPrinter {
    progress_print: ProgressPrint,
}

impl MakeLogPrinter {
    fn new(progress_print: ProgressPrint) -> Self {
        Self { progress_print }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogPrinter {
    type Writer = LogPrinter<'a>;

    fn make_writer(&'a self) -> LogPrinter<'a> {
        LogPrinter {
            progress_print: &self.progress_print,
            buf: Vec::new(),
        }
    }
}

struct LogPrinter<'a> {
    progress_print: &'a ProgressPrint,
    buf: Vec<u8>,
}

impl Drop for LogPrinter<'_> {
    fn drop(&mut self) {
        self.progress_print.print_raw_line(self.buf.clone());
    }
}

impl std::io::Write for LogPrinter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf.extend(buf);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
