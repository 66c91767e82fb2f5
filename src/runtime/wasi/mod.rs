//! A small WASI bridge over a virtual file table.
//!
//! Only the calls needed by freestanding guests that talk to the embedder
//! through files are provided: arguments, `path_open`/`path_filestat_get`
//! against [`VirtualFileTable`], `fd_read`/`fd_write`, `fd_seek`,
//! `clock_time_get` and `poll_oneoff`. Every call is registered under both
//! `wasi_unstable` and `wasi_snapshot_preview1`; the two differ only in the
//! `filestat` layout.
//!
//! # Specification
//!
//! <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md>
//!
//! # Usage
//!
//! ```ignore
//! use wasmbox::runtime::wasi::{self, VirtualFile, WasiContext};
//! use std::rc::Rc;
//!
//! let ctx = Rc::new(WasiContext::builder()
//!     .args(["game", "rom"])
//!     .file("rom", VirtualFile::rom(1000, rom_bytes))
//!     .on_poll(|| frame_clock.tick())
//!     .build());
//!
//! let mut linker = Linker::new();
//! wasi::add_to_linker(&mut linker, ctx.clone());
//! let id = store.instantiate(&module, &linker)?;
//! store.invoke_export(id, "_start", &[])?;
//! ```
//!
//! Status codes go back to the guest as [`WasiErrno`]. The only fatal
//! condition is a path with no virtual file behind it, which traps with
//! [`Trap::Host`].

pub mod context;
pub mod types;
pub mod vfs;

pub use context::{WasiContext, WasiContextBuilder, STDERR_FD, STDOUT_FD};
pub use types::{Filestat, Namespace, WasiErrno, WasiFileType};
pub use vfs::{VirtualFile, VirtualFileTable};

use crate::parser::module::{FunctionType, ValueType};
use crate::runtime::value::format_values;
use crate::runtime::{Caller, Linker, Memory, Trap, Value};
use once_cell::sync::Lazy;
use std::rc::Rc;
use types::{EVENT_SIZE, IOVEC_SIZE, SUBSCRIPTION_SIZE};

type WasiCall = fn(&WasiContext, &Caller<'_>, &[Value], Namespace) -> Result<WasiErrno, Trap>;

struct HostCall {
    name: &'static str,
    signature: FunctionType,
    call: WasiCall,
}

/// Every call the bridge provides. All of them return an errno as i32.
static CALLS: Lazy<Vec<HostCall>> = Lazy::new(|| {
    use ValueType::{I32, I64};
    vec![
        host_call("args_sizes_get", &[I32, I32], args_sizes_get),
        host_call("args_get", &[I32, I32], args_get),
        host_call("path_open", &[I32, I32, I32, I32, I32, I64, I64, I32, I32], path_open),
        host_call("path_filestat_get", &[I32, I32, I32, I32, I32], path_filestat_get),
        host_call("fd_seek", &[I32, I64, I32, I32], fd_seek),
        host_call("fd_read", &[I32, I32, I32, I32], fd_read),
        host_call("fd_write", &[I32, I32, I32, I32], fd_write),
        host_call("clock_time_get", &[I32, I64, I32], clock_time_get),
        host_call("poll_oneoff", &[I32, I32, I32, I32], poll_oneoff),
    ]
});

fn host_call(name: &'static str, params: &[ValueType], call: WasiCall) -> HostCall {
    HostCall {
        name,
        signature: FunctionType::new(params.to_vec(), vec![ValueType::I32]),
        call,
    }
}

/// Registers every WASI call under both namespaces, all sharing `ctx`.
pub fn add_to_linker(linker: &mut Linker, ctx: Rc<WasiContext>) {
    for namespace in Namespace::ALL {
        for host in CALLS.iter() {
            let ctx = ctx.clone();
            let (name, call) = (host.name, host.call);
            linker.link_function(
                namespace.module_name(),
                name,
                move |caller, args| {
                    log::trace!("{namespace}.{name}({})", format_values(args));
                    let errno = call(&ctx, caller, args, namespace)?;
                    log::trace!("{namespace}.{name} -> {errno:?}");
                    Ok(vec![Value::I32(errno.as_u32() as i32)])
                },
                host.signature.clone(),
            );
        }
    }
}

/// Names of the provided calls, in registration order.
pub fn call_names() -> impl Iterator<Item = &'static str> {
    CALLS.iter().map(|host| host.name)
}

/// Unwraps a guest memory access, answering `FAULT` if it fell outside
/// linear memory.
macro_rules! guest {
    ($access:expr) => {
        match $access {
            Ok(value) => value,
            Err(_) => return Ok(WasiErrno::Fault),
        }
    };
}

/// Extract an i32 argument as the unsigned guest value.
fn arg_u32(args: &[Value], idx: usize) -> Result<u32, Trap> {
    match args.get(idx) {
        Some(Value::I32(v)) => Ok(*v as u32),
        other => Err(Trap::TypeMismatch {
            expected: format!("i32 argument {idx}"),
            actual: other.map_or_else(|| "nothing".to_string(), |v| v.typ().to_string()),
        }),
    }
}

/// `base + delta` as a guest address.
fn offset(base: u32, delta: u64) -> Result<u32, Trap> {
    u32::try_from(u64::from(base) + delta).map_err(|_| Trap::MemoryOutOfBounds)
}

/// Read `(buf, buf_len)` pairs from an iovec array.
fn read_iovecs(memory: &Memory, ptr: u32, count: u32) -> Result<Vec<(u32, u32)>, Trap> {
    (0..count)
        .map(|i| {
            let base = offset(ptr, u64::from(i) * u64::from(IOVEC_SIZE))?;
            Ok((memory.read_u32(base)?, memory.read_u32(offset(base, 4)?)?))
        })
        .collect()
}

fn read_path(memory: &Memory, ptr: u32, len: u32) -> Result<String, Trap> {
    let bytes = memory.read_bytes(ptr, len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn unknown_path(call: &str, path: &str) -> Trap {
    Trap::Host(format!("{call}: no virtual file at {path:?}"))
}

/// args_sizes_get: Return the number of arguments and the size of the argument string data.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#args_sizes_get>
fn args_sizes_get(ctx: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let argc_ptr = arg_u32(args, 0)?;
    let buf_size_ptr = arg_u32(args, 1)?;

    let (argc, buf_size) = ctx.args_sizes();
    let mut memory = caller.memory_mut()?;
    guest!(memory.write_u32(argc_ptr, argc));
    guest!(memory.write_u32(buf_size_ptr, buf_size));
    Ok(WasiErrno::Success)
}

/// args_get: Write the argv pointer array, then the NUL-terminated strings.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#args_get>
fn args_get(ctx: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let argv = arg_u32(args, 0)?;
    let argv_buf = arg_u32(args, 1)?;

    let mut memory = caller.memory_mut()?;
    let mut cursor = argv_buf;
    for (i, arg) in ctx.args().iter().enumerate() {
        guest!(memory.write_u32(guest!(offset(argv, i as u64 * 4)), cursor));
        guest!(memory.write_bytes(cursor, arg.as_bytes()));
        let nul = guest!(offset(cursor, arg.len() as u64));
        guest!(memory.write_u8(nul, 0));
        cursor = guest!(offset(nul, 1));
    }
    Ok(WasiErrno::Success)
}

/// path_open: Resolve `path` in the virtual file table and hand out its
/// registered descriptor. Directory, flags and rights are ignored.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#path_open>
fn path_open(ctx: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let dirfd = arg_u32(args, 0)?;
    let path_ptr = arg_u32(args, 2)?;
    let path_len = arg_u32(args, 3)?;
    let fd_ptr = arg_u32(args, 8)?;

    let path = guest!(read_path(&*caller.memory()?, path_ptr, path_len));
    let file = ctx.file(&path).ok_or_else(|| unknown_path("path_open", &path))?;
    log::trace!("path_open: {dirfd}:{path} => {}", file.fd());
    guest!(caller.memory_mut()?.write_u32(fd_ptr, file.fd()));
    Ok(WasiErrno::Success)
}

/// path_filestat_get: Describe a virtual file in the namespace's layout.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#path_filestat_get>
fn path_filestat_get(
    ctx: &WasiContext,
    caller: &Caller<'_>,
    args: &[Value],
    namespace: Namespace,
) -> Result<WasiErrno, Trap> {
    let path_ptr = arg_u32(args, 2)?;
    let path_len = arg_u32(args, 3)?;
    let buf = arg_u32(args, 4)?;

    let path = guest!(read_path(&*caller.memory()?, path_ptr, path_len));
    let file = ctx.file(&path).ok_or_else(|| unknown_path("path_filestat_get", &path))?;
    guest!(caller.memory_mut()?.write_bytes(buf, &file.filestat().encode(namespace)));
    Ok(WasiErrno::Success)
}

/// fd_seek: Virtual files are streams, so the new position is always 0.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#fd_seek>
fn fd_seek(_: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let whence = arg_u32(args, 2)?;
    let result_ptr = arg_u32(args, 3)?;

    if whence > 2 {
        return Ok(WasiErrno::Inval);
    }
    guest!(caller.memory_mut()?.write_u64(result_ptr, 0));
    Ok(WasiErrno::Success)
}

/// fd_read: Ask the file's reader for the combined iovec length once, then
/// scatter what it returned across the buffers in order.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#fd_read>
fn fd_read(ctx: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let fd = arg_u32(args, 0)?;
    let iovs_ptr = arg_u32(args, 1)?;
    let iovs_len = arg_u32(args, 2)?;
    let nread_ptr = arg_u32(args, 3)?;

    let iovecs = guest!(read_iovecs(&*caller.memory()?, iovs_ptr, iovs_len));
    let total: usize = iovecs.iter().map(|&(_, len)| len as usize).sum();
    let data = match ctx.read_fd(fd, total) {
        Ok(data) => data,
        Err(errno) => {
            log::warn!("fd_read: cannot read fd {fd}");
            return Ok(errno);
        }
    };

    let mut memory = caller.memory_mut()?;
    let mut delivered = 0;
    for (buf, len) in iovecs {
        if delivered == data.len() {
            break;
        }
        let end = (delivered + len as usize).min(data.len());
        guest!(memory.write_bytes(buf, &data[delivered..end]));
        delivered = end;
    }
    guest!(memory.write_u32(nread_ptr, delivered as u32));
    Ok(WasiErrno::Success)
}

/// fd_write: Gather the iovecs and send them to stdout, stderr or the
/// virtual file's writer.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#fd_write>
fn fd_write(ctx: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let fd = arg_u32(args, 0)?;
    let iovs_ptr = arg_u32(args, 1)?;
    let iovs_len = arg_u32(args, 2)?;
    let nwritten_ptr = arg_u32(args, 3)?;

    let data = {
        let memory = caller.memory()?;
        let mut data = Vec::new();
        for (buf, len) in guest!(read_iovecs(&memory, iovs_ptr, iovs_len)) {
            data.extend_from_slice(guest!(memory.read_bytes(buf, len)));
        }
        data
    };

    let written = match ctx.write_fd(fd, &data) {
        Ok(written) => written,
        Err(errno) => {
            log::warn!("fd_write: cannot write fd {fd}");
            return Ok(errno);
        }
    };
    guest!(caller.memory_mut()?.write_u32(nwritten_ptr, written as u32));
    Ok(WasiErrno::Success)
}

/// clock_time_get: The embedder's clock, or 0 without one.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#clock_time_get>
fn clock_time_get(ctx: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let clock_id = arg_u32(args, 0)?;
    let time_ptr = arg_u32(args, 2)?;

    guest!(caller.memory_mut()?.write_u64(time_ptr, ctx.now(clock_id)));
    Ok(WasiErrno::Success)
}

/// poll_oneoff: Tick the embedder's poll hook and report every subscription
/// as having fired. Never blocks.
///
/// See: <https://github.com/WebAssembly/WASI/blob/wasi-0.1/preview1/docs.md#poll_oneoff>
fn poll_oneoff(ctx: &WasiContext, caller: &Caller<'_>, args: &[Value], _: Namespace) -> Result<WasiErrno, Trap> {
    let in_ptr = arg_u32(args, 0)?;
    let out_ptr = arg_u32(args, 1)?;
    let nsubscriptions = arg_u32(args, 2)?;
    let nevents_ptr = arg_u32(args, 3)?;

    if nsubscriptions == 0 {
        return Ok(WasiErrno::Inval);
    }
    ctx.tick();

    let mut memory = caller.memory_mut()?;
    for i in 0..u64::from(nsubscriptions) {
        let sub = guest!(offset(in_ptr, i * u64::from(SUBSCRIPTION_SIZE)));
        let userdata = guest!(memory.read_u64(sub));
        let tag = guest!(memory.read_u8(guest!(offset(sub, 8))));

        let mut event = [0u8; EVENT_SIZE as usize];
        event[0..8].copy_from_slice(&userdata.to_le_bytes());
        event[10] = tag;
        guest!(memory.write_bytes(guest!(offset(out_ptr, i * u64::from(EVENT_SIZE))), &event));
    }
    guest!(memory.write_u32(nevents_ptr, nsubscriptions));
    Ok(WasiErrno::Success)
}
