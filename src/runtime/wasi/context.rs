//! WASI context for managing WASI state
//!
//! `WasiContext` holds what the host calls need between invocations: guest
//! arguments, the standard output streams, the virtual file table and the
//! embedder's clock and poll hooks. It is shared by every registered call
//! through an `Rc`.

use super::types::WasiErrno;
use super::vfs::{VirtualFile, VirtualFileTable};
use std::cell::{Cell, RefCell};
use std::io::Write;

/// Standard output descriptor.
pub const STDOUT_FD: u32 = 1;
/// Standard error descriptor.
pub const STDERR_FD: u32 = 2;

pub type PollHook = Box<dyn Fn()>;
/// Returns the current time in nanoseconds for a WASI clock id.
pub type ClockHook = Box<dyn Fn(u32) -> u64>;

pub struct WasiContext {
    /// Guest arguments, program name first
    args: Vec<String>,
    stdout: RefCell<Box<dyn Write>>,
    stderr: RefCell<Box<dyn Write>>,
    files: VirtualFileTable,
    /// Called once per `poll_oneoff`
    on_poll: Option<PollHook>,
    clock: Option<ClockHook>,
    polls: Cell<u64>,
}

impl WasiContext {
    /// Create a new builder for WasiContext
    pub fn builder() -> WasiContextBuilder {
        WasiContextBuilder::new()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The argument count and the byte size of all arguments with their
    /// NUL terminators.
    pub fn args_sizes(&self) -> (u32, u32) {
        let buf_size: usize = self.args.iter().map(|arg| arg.len() + 1).sum();
        (self.args.len() as u32, buf_size as u32)
    }

    pub fn files(&self) -> &VirtualFileTable {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&VirtualFile> {
        self.files.get(path)
    }

    /// Writes `bytes` to fd 1 or 2, or to the virtual file holding `fd`.
    pub fn write_fd(&self, fd: u32, bytes: &[u8]) -> Result<usize, WasiErrno> {
        let stream = match fd {
            STDOUT_FD => &self.stdout,
            STDERR_FD => &self.stderr,
            _ => {
                let file = self.files.by_fd(fd).ok_or(WasiErrno::BadF)?;
                return if file.write(bytes) {
                    Ok(bytes.len())
                } else {
                    Err(WasiErrno::BadF)
                };
            }
        };
        let mut stream = stream.try_borrow_mut().map_err(|_| WasiErrno::Io)?;
        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(|_| WasiErrno::Io)?;
        Ok(bytes.len())
    }

    /// Reads up to `total` bytes from the virtual file holding `fd`.
    pub fn read_fd(&self, fd: u32, total: usize) -> Result<Vec<u8>, WasiErrno> {
        self.files
            .by_fd(fd)
            .and_then(|file| file.read(total))
            .ok_or(WasiErrno::BadF)
    }

    /// One `poll_oneoff` happened: bump the counter and run the hook.
    pub fn tick(&self) {
        self.polls.set(self.polls.get() + 1);
        if let Some(hook) = &self.on_poll {
            hook();
        }
    }

    /// How many times `poll_oneoff` has been called.
    pub fn poll_count(&self) -> u64 {
        self.polls.get()
    }

    /// Time for `clock_id` in nanoseconds; zero without a clock hook.
    pub fn now(&self, clock_id: u32) -> u64 {
        self.clock.as_ref().map_or(0, |clock| clock(clock_id))
    }
}

impl std::fmt::Debug for WasiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiContext")
            .field("args", &self.args)
            .field("files", &self.files)
            .field("polls", &self.polls.get())
            .finish()
    }
}

/// Builder for WasiContext
pub struct WasiContextBuilder {
    args: Vec<String>,
    stdout: Option<Box<dyn Write>>,
    stderr: Option<Box<dyn Write>>,
    files: VirtualFileTable,
    on_poll: Option<PollHook>,
    clock: Option<ClockHook>,
}

impl WasiContextBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            stdout: None,
            stderr: None,
            files: VirtualFileTable::new(),
            on_poll: None,
            clock: None,
        }
    }

    /// Set command line arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set stdout; the process stdout otherwise
    pub fn stdout(mut self, stdout: Box<dyn Write>) -> Self {
        self.stdout = Some(stdout);
        self
    }

    /// Set stderr; the process stderr otherwise
    pub fn stderr(mut self, stderr: Box<dyn Write>) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Register a virtual file under `path`
    pub fn file(mut self, path: impl Into<String>, file: VirtualFile) -> Self {
        self.files.insert(path, file);
        self
    }

    pub fn on_poll<F: Fn() + 'static>(mut self, hook: F) -> Self {
        self.on_poll = Some(Box::new(hook));
        self
    }

    pub fn clock<F: Fn(u32) -> u64 + 'static>(mut self, clock: F) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Build the WasiContext
    pub fn build(self) -> WasiContext {
        WasiContext {
            args: self.args,
            stdout: RefCell::new(self.stdout.unwrap_or_else(|| Box::new(std::io::stdout()))),
            stderr: RefCell::new(self.stderr.unwrap_or_else(|| Box::new(std::io::stderr()))),
            files: self.files,
            on_poll: self.on_poll,
            clock: self.clock,
            polls: Cell::new(0),
        }
    }
}

impl Default for WasiContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    /// A `Write` whose buffer stays reachable after it is boxed.
    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builder_creates_context_with_args() {
        let ctx = WasiContext::builder().args(["wasmboy", "rom"]).build();
        assert_eq!(ctx.args(), ["wasmboy", "rom"]);
        assert_eq!(ctx.args_sizes(), (2, 12));
    }

    #[test]
    fn test_standard_streams() {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let ctx = WasiContext::builder()
            .stdout(Box::new(out.clone()))
            .stderr(Box::new(err.clone()))
            .build();

        assert_eq!(ctx.write_fd(STDOUT_FD, b"hello"), Ok(5));
        assert_eq!(ctx.write_fd(STDERR_FD, b"oops"), Ok(4));
        assert_eq!(&*out.0.borrow(), b"hello");
        assert_eq!(&*err.0.borrow(), b"oops");
    }

    #[test]
    fn test_unknown_descriptors() {
        let ctx = WasiContext::builder()
            .file("rom", VirtualFile::rom(1000, vec![1, 2, 3]))
            .build();
        assert_eq!(ctx.write_fd(9, b"x"), Err(WasiErrno::BadF));
        assert_eq!(ctx.write_fd(1000, b"x"), Err(WasiErrno::BadF));
        assert_eq!(ctx.read_fd(9, 4), Err(WasiErrno::BadF));
        assert_eq!(ctx.read_fd(1000, 2), Ok(vec![1, 2]));
    }

    #[test]
    fn test_hooks() {
        let ticks = Rc::new(Cell::new(0));
        let counter = ticks.clone();
        let ctx = WasiContext::builder()
            .on_poll(move || counter.set(counter.get() + 1))
            .clock(|id| 1_000 + u64::from(id))
            .build();
        ctx.tick();
        ctx.tick();
        assert_eq!(ticks.get(), 2);
        assert_eq!(ctx.poll_count(), 2);
        assert_eq!(ctx.now(1), 1_001);
        assert_eq!(WasiContext::builder().build().now(1), 0);
    }
}
