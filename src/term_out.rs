use std::io::Write as _;
use std::sync::mpsc;
use std::time::{Duration, Instant};

// All terminal output funnels through one thread: the updating status line
// stays on the last row and log lines printed through `print_raw_line` are
// inserted above it without tearing.

const REPAINT_PERIOD: Duration = Duration::from_millis(100);

pub(crate) fn init(enable_progress: bool) -> Handle {
    let (sender, receiver) = mpsc::channel();

    let join_handle = std::thread::Builder::new()
        .name("status line".into())
        .spawn(move || thread_main(enable_progress, receiver))
        .expect("failed to spawn thread");

    Handle {
        join_handle,
        sender,
    }
}

enum Command {
    SetProgress(String),
    FinishProgress,
    PrintRawLine(Vec<u8>),
    Shutdown,
}

fn thread_main(enable_progress: bool, receiver: mpsc::Receiver<Command>) {
    let mut stderr = std::io::stderr();
    let mut shown: Option<String> = None;
    let mut pending: Option<String> = None;
    let mut last_paint = Instant::now() - REPAINT_PERIOD;

    loop {
        let cmd = if pending.is_some() {
            let wait = REPAINT_PERIOD.saturating_sub(last_paint.elapsed());
            match receiver.recv_timeout(wait) {
                Ok(cmd) => Some(cmd),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => Some(Command::Shutdown),
            }
        } else {
            match receiver.recv() {
                Ok(cmd) => Some(cmd),
                Err(mpsc::RecvError) => Some(Command::Shutdown),
            }
        };

        match cmd {
            None => {
                // repaint timer fired
                if let Some(line) = pending.take() {
                    paint(&mut stderr, &line);
                    shown = Some(line);
                    last_paint = Instant::now();
                }
            }
            Some(Command::SetProgress(line)) => {
                if !enable_progress {
                    continue;
                }
                if last_paint.elapsed() >= REPAINT_PERIOD {
                    paint(&mut stderr, &line);
                    shown = Some(line);
                    pending = None;
                    last_paint = Instant::now();
                } else {
                    pending = Some(line);
                }
            }
            Some(Command::FinishProgress) => {
                if let Some(line) = pending.take().or(shown.take()) {
                    paint(&mut stderr, &line);
                    handle_err(stderr.write_all(b", done.\n"));
                    handle_err(stderr.flush());
                }
            }
            Some(Command::PrintRawLine(raw)) => {
                if shown.is_some() || pending.is_some() {
                    handle_err(crossterm::queue!(
                        stderr,
                        crossterm::terminal::Clear(crossterm::terminal::ClearType::CurrentLine),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                }
                handle_err(stderr.write_all(&raw));
                if let Some(line) = pending.as_deref().or(shown.as_deref()) {
                    paint(&mut stderr, line);
                }
                handle_err(stderr.flush());
            }
            Some(Command::Shutdown) => {
                if shown.is_some() {
                    handle_err(stderr.write_all(b"\n"));
                    handle_err(stderr.flush());
                }
                break;
            }
        }
    }
}

fn paint(stderr: &mut std::io::Stderr, line: &str) {
    handle_err(crossterm::queue!(
        stderr,
        crossterm::cursor::MoveToColumn(0),
        crossterm::style::Print(line),
        crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
    ));
    handle_err(stderr.flush());
}

fn handle_err<T>(r: std::io::Result<T>) -> T {
    r.expect("stderr write failed")
}

pub(crate) struct Handle {
    join_handle: std::thread::JoinHandle<()>,
    sender: mpsc::Sender<Command>,
}

impl Handle {
    pub(crate) fn finish(self) {
        self.sender
            .send(Command::Shutdown)
            .expect("status line endpoint closed");
        self.join_handle.join().expect("status line thread panicked");
    }

    pub(crate) fn get_progress_print(&self) -> ProgressPrint {
        ProgressPrint {
            sender: self.sender.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ProgressPrint {
    sender: mpsc::Sender<Command>,
}

impl ProgressPrint {
    pub(crate) fn set_progress(&self, progress: String) {
        self.sender
            .send(Command::SetProgress(progress))
            .expect("status line endpoint closed");
    }

    /// Completes the current status line with ", done.".
    pub(crate) fn finish_progress(&self) {
        self.sender
            .send(Command::FinishProgress)
            .expect("status line endpoint closed");
    }

    pub(crate) fn print_raw_line(&self, line: Vec<u8>) {
        self.sender
            .send(Command::PrintRawLine(line))
            .expect("status line endpoint closed");
    }
}
