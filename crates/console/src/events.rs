//! Local event sources: stdin chunks and terminal resize notifications

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const CHANNEL_CAPACITY: usize = 64;
const READ_BUFFER_SIZE: usize = 4096;
#[cfg(unix)]
const POLL_INTERVAL_MS: libc::c_int = 50;

/// Receivers handed to the bridge while subscribed
pub struct EventStreams {
    /// One entry per stdin read
    pub input: mpsc::Receiver<Vec<u8>>,
    /// `(cols, rows)` after every resize
    pub resize: mpsc::Receiver<(u16, u16)>,
}

/// A source of local input and resize events
pub trait LocalEvents: Send {
    /// Start delivering events
    fn subscribe(&mut self) -> io::Result<EventStreams>;

    /// Stop delivering events and release the underlying listeners
    fn unsubscribe(&mut self);
}

/// Reads the process's stdin and listens for SIGWINCH
#[derive(Default)]
pub struct StdioEvents {
    stop: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
    resize_task: Option<tokio::task::JoinHandle<()>>,
}

impl StdioEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalEvents for StdioEvents {
    fn subscribe(&mut self) -> io::Result<EventStreams> {
        self.unsubscribe();
        self.stop = Arc::new(AtomicBool::new(false));

        let (input_tx, input) = mpsc::channel(CHANNEL_CAPACITY);
        let stop = self.stop.clone();
        self.reader = Some(
            thread::Builder::new()
                .name("console-stdin".to_string())
                .spawn(move || read_stdin(input_tx, stop))?,
        );

        let (resize_tx, resize) = mpsc::channel(CHANNEL_CAPACITY);
        self.resize_task = Some(spawn_resize_listener(resize_tx)?);

        debug!("Subscribed to stdin and resize events");
        Ok(EventStreams { input, resize })
    }

    fn unsubscribe(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.resize_task.take() {
            task.abort();
        }
        if let Some(reader) = self.reader.take() {
            finish_reader(reader);
            debug!("Unsubscribed from stdin and resize events");
        }
    }
}

/// The unix reader polls and sees `stop` within one poll interval
#[cfg(unix)]
fn finish_reader(reader: thread::JoinHandle<()>) {
    if reader.join().is_err() {
        warn!("stdin reader thread panicked");
    }
}

/// Elsewhere the reader may sit in a blocking read until the next key, so
/// it is detached and exits on its own once it sees `stop`
#[cfg(not(unix))]
fn finish_reader(reader: thread::JoinHandle<()>) {
    drop(reader);
}

impl Drop for StdioEvents {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Poll stdin so the reader notices `stop` without needing another keypress
#[cfg(unix)]
fn read_stdin(tx: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    while !stop.load(Ordering::SeqCst) {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `fds` is a valid pollfd for the duration of the call
        let ready = unsafe { libc::poll(&mut fds, 1, POLL_INTERVAL_MS) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("Polling stdin failed: {}", err);
            return;
        }
        if ready == 0 || stop.load(Ordering::SeqCst) {
            continue;
        }

        // SAFETY: `buffer` is valid for `buffer.len()` bytes of writes
        let n = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!("Reading stdin failed: {}", err);
            return;
        }
        if n == 0 {
            debug!("stdin reached EOF");
            return;
        }

        trace!("stdin: {} bytes", n);
        if tx.blocking_send(buffer[..n as usize].to_vec()).is_err() {
            return;
        }
    }
}

#[cfg(not(unix))]
fn read_stdin(tx: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
    use std::io::Read;

    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut stdin = io::stdin();
    while !stop.load(Ordering::SeqCst) {
        match stdin.read(&mut buffer) {
            Ok(0) => return,
            Ok(n) => {
                if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Reading stdin failed: {}", e);
                return;
            }
        }
    }
}

#[cfg(unix)]
fn spawn_resize_listener(
    tx: mpsc::Sender<(u16, u16)>,
) -> io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut winch = signal(SignalKind::window_change())?;
    Ok(tokio::spawn(async move {
        while winch.recv().await.is_some() {
            let size = match crossterm::terminal::size() {
                Ok(size) => size,
                Err(e) => {
                    debug!("Could not read terminal size after resize: {}", e);
                    continue;
                }
            };
            trace!("Terminal resized to {}x{}", size.0, size.1);
            if tx.send(size).await.is_err() {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_resize_listener(
    tx: mpsc::Sender<(u16, u16)>,
) -> io::Result<tokio::task::JoinHandle<()>> {
    // No resize notifications; keep the sender alive until unsubscribed
    Ok(tokio::spawn(async move {
        tx.closed().await;
    }))
}
