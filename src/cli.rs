use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(
    name = "subconvert",
    about = "Convert a Subversion dump stream into one or more Git repositories"
)]
pub(crate) struct Cli {
    #[arg(long = "verify", help = "Verify checksums while scanning", global = true)]
    pub(crate) verify: bool,
    #[arg(
        short = 'v',
        long = "verbose",
        help = "Report each change as it is applied",
        global = true
    )]
    pub(crate) verbose: bool,
    #[arg(short = 'q', long = "quiet", help = "Suppress status output", global = true)]
    pub(crate) quiet: bool,
    #[arg(short = 'd', long = "debug", help = "Print debugging output", global = true)]
    pub(crate) debug: bool,
    #[arg(long = "skip", help = "Skip the pre-scan validation pass", global = true)]
    pub(crate) skip: bool,
    #[arg(
        long = "start",
        value_name = "REV",
        help = "Ignore revisions before REV",
        global = true
    )]
    pub(crate) start: Option<u32>,
    #[arg(
        long = "cutoff",
        value_name = "REV",
        help = "Stop before applying REV",
        global = true
    )]
    pub(crate) cutoff: Option<u32>,
    #[arg(
        short = 'A',
        long = "authors",
        value_name = "FILE",
        help = "Authors table (id, name, email; tab-separated)",
        global = true
    )]
    pub(crate) authors_file: Option<PathBuf>,
    #[arg(
        short = 'B',
        long = "branches",
        value_name = "FILE",
        help = "Branches table (prefix to branch name; tab-separated)",
        global = true
    )]
    pub(crate) branches_file: Option<PathBuf>,
    #[arg(
        short = 'M',
        long = "modules",
        value_name = "FILE",
        help = "Submodules table",
        global = true
    )]
    pub(crate) modules_file: Option<PathBuf>,
    #[arg(
        long = "gc",
        value_name = "N",
        help = "Garbage-collect the repository every N revisions",
        global = true
    )]
    pub(crate) gc: Option<u32>,
    #[arg(long = "no-progress", help = "Do not print progress", global = true)]
    pub(crate) no_progress: bool,
    #[arg(
        long = "log-file",
        value_name = "PATH",
        help = "File to write logs (besides stderr)",
        global = true
    )]
    pub(crate) log_file: Option<PathBuf>,
    #[arg(
        long = "stderr-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum stderr log level (derived from -v/-q/-d by default)",
        global = true
    )]
    pub(crate) stderr_log_level: Option<LogLevel>,
    #[arg(
        long = "file-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum file log level (debug by default)",
        global = true
    )]
    pub(crate) file_log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(clap::Subcommand)]
pub(crate) enum Command {
    #[command(about = "Print each node of the dump in a readable form")]
    Print { dump_file: PathBuf },
    #[command(about = "Report how often each author id appears")]
    Authors { dump_file: PathBuf },
    #[command(about = "Report a row for every detected branch")]
    Branches { dump_file: PathBuf },
    #[command(about = "Convert the dump into a Git repository")]
    Convert {
        dump_file: PathBuf,
        #[arg(help = "Target repository directory (current directory by default)")]
        target: Option<PathBuf>,
    },
    #[command(about = "Read the whole dump, verifying its integrity")]
    Scan { dump_file: PathBuf },
    #[command(name = "git-test", about = "Sanity-test the Git object writer")]
    GitTest {
        #[arg(help = "Repository directory to write into")]
        repo_dir: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl LogLevel {
    pub(crate) fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}
