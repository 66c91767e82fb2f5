//! wasmbox command line runner.
//!
//! ```text
//! wasmbox [options] <module.wasm> [guest args...]
//!
//!   --config <run.json>     run file with runtime config, args, files and export
//!   --stack-size <bytes>    call stack budget
//!   --invoke <export>       export to call (default `_start`)
//!   --file <path=hostfile>  serve reads of virtual `path` from `hostfile`
//!   --dump <addr:len>       hex-dump linear memory after the run
//! ```
//!
//! Logging goes to stderr, filtered by `WASMBOX_LOG` (`warn` by default, also
//! per module as in `WASMBOX_LOG=wasmbox::runtime::wasi=trace`).

use env_logger::{Builder, Env};
use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use wasmbox::parser::module::{FunctionType, ValueType};
use wasmbox::runtime::value::format_values;
use wasmbox::runtime::wasi::{self, VirtualFile, WasiContext};
use wasmbox::runtime::{Linker, RuntimeConfig, Store, Value};

/// Descriptors handed to `--file` mappings start here.
const FIRST_VIRTUAL_FD: u32 = 1000;
const DUMP_LINE: usize = 16;

/// Environment variable holding the log filter, in `env_logger` syntax.
const LOG_ENV: &str = "WASMBOX_LOG";

fn log_builder() -> Builder {
    Builder::from_env(Env::new().filter_or(LOG_ENV, "warn"))
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Sink {
    Stdout,
    Stderr,
    Null,
}

/// One entry of the run file's virtual file table.
#[derive(Debug, Deserialize)]
struct FileMapping {
    path: String,
    fd: u32,
    #[serde(default = "default_kind")]
    kind: FileKind,
    /// Host file whose contents are served to reads
    source: Option<PathBuf>,
    sink: Option<Sink>,
}

fn default_kind() -> FileKind {
    FileKind::File
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunFile {
    runtime: RuntimeConfig,
    args: Vec<String>,
    files: Vec<FileMapping>,
    invoke: Option<String>,
}

#[derive(Debug, Default)]
struct Options {
    run: RunFile,
    module: PathBuf,
    dump: Option<(u32, u32)>,
}

fn usage() -> String {
    "usage: wasmbox [--config run.json] [--stack-size N] [--invoke NAME] \
     [--file path=hostfile]... [--dump addr:len] <module.wasm> [args...]"
        .to_string()
}

fn parse_number(text: &str) -> Result<u32, Box<dyn Error>> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => text.parse()?,
    };
    Ok(parsed)
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Options, Box<dyn Error>> {
    let mut options = Options::default();
    let mut stack_size = None;
    let mut invoke = None;
    let mut extra_files = Vec::new();
    let mut positional = Vec::new();

    while let Some(arg) = argv.next() {
        let mut value = |flag: &str| argv.next().ok_or_else(|| format!("{flag} needs a value"));
        match arg.as_str() {
            "--config" => {
                let path = value("--config")?;
                let text = fs::read_to_string(&path).map_err(|e| format!("{path}: {e}"))?;
                options.run = serde_json::from_str(&text).map_err(|e| format!("{path}: {e}"))?;
            }
            "--stack-size" => stack_size = Some(value("--stack-size")?.parse::<usize>()?),
            "--invoke" => invoke = Some(value("--invoke")?),
            "--file" => {
                let mapping = value("--file")?;
                let (path, host) = mapping
                    .split_once('=')
                    .ok_or_else(|| format!("--file expects path=hostfile, got {mapping:?}"))?;
                extra_files.push((path.to_string(), PathBuf::from(host)));
            }
            "--dump" => {
                let range = value("--dump")?;
                let (addr, len) = range
                    .split_once(':')
                    .ok_or_else(|| format!("--dump expects addr:len, got {range:?}"))?;
                options.dump = Some((parse_number(addr)?, parse_number(len)?));
            }
            "-h" | "--help" => return Err(usage().into()),
            _ => {
                positional.push(arg);
                positional.extend(argv.by_ref());
            }
        }
    }

    let mut positional = positional.into_iter();
    options.module = positional.next().map(PathBuf::from).ok_or_else(usage)?;
    let guest_args: Vec<String> = positional.collect();

    if let Some(stack_size) = stack_size {
        options.run.runtime.stack_size = stack_size;
    }
    if invoke.is_some() {
        options.run.invoke = invoke;
    }
    if !guest_args.is_empty() || options.run.args.is_empty() {
        let program = options
            .module
            .file_stem()
            .map_or_else(|| "wasm".to_string(), |stem| stem.to_string_lossy().into_owned());
        options.run.args = std::iter::once(program).chain(guest_args).collect();
    }

    let mut next_fd = options
        .run
        .files
        .iter()
        .map(|file| file.fd + 1)
        .max()
        .unwrap_or(FIRST_VIRTUAL_FD)
        .max(FIRST_VIRTUAL_FD);
    for (path, source) in extra_files {
        options.run.files.push(FileMapping {
            path,
            fd: next_fd,
            kind: FileKind::File,
            source: Some(source),
            sink: None,
        });
        next_fd += 1;
    }
    Ok(options)
}

fn virtual_file(mapping: &FileMapping) -> Result<VirtualFile, Box<dyn Error>> {
    let mut file = match (mapping.kind, &mapping.source) {
        (FileKind::Directory, _) => VirtualFile::directory(mapping.fd),
        (FileKind::File, Some(source)) => {
            let bytes = fs::read(source).map_err(|e| format!("{}: {e}", source.display()))?;
            VirtualFile::rom(mapping.fd, bytes)
        }
        (FileKind::File, None) => VirtualFile::regular(mapping.fd, 0),
    };
    file = match mapping.sink {
        Some(Sink::Stdout) => file.writer(|bytes| print!("{}", String::from_utf8_lossy(bytes))),
        Some(Sink::Stderr) => file.writer(|bytes| eprint!("{}", String::from_utf8_lossy(bytes))),
        Some(Sink::Null) => file.writer(|_| {}),
        None => file,
    };
    Ok(file)
}

fn parse_value(ty: ValueType, text: &str) -> Result<Value, Box<dyn Error>> {
    let value = match ty {
        // accept both the signed and the unsigned spelling of a 32-bit value
        ValueType::I32 => Value::I32(match text.parse::<i32>() {
            Ok(value) => value,
            Err(_) => text
                .parse::<u32>()
                .map_err(|_| format!("{text:?} is not a 32-bit integer"))? as i32,
        }),
        ValueType::I64 => Value::I64(text.parse()?),
        ValueType::F32 => Value::F32(text.parse()?),
        ValueType::F64 => Value::F64(text.parse()?),
        other => return Err(format!("cannot pass a {other} argument from the command line").into()),
    };
    Ok(value)
}

fn hex_dump(bytes: &[u8], base: u32) {
    for (i, line) in bytes.chunks(DUMP_LINE).enumerate() {
        println!("{:08x}: {}", base as usize + i * DUMP_LINE, hex::encode(line));
    }
}

fn run(options: Options) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(&options.module).map_err(|e| format!("{}: {e}", options.module.display()))?;
    let name = options.module.to_string_lossy();
    let module = wasmbox::load(&name, &bytes)?;

    let mut ctx = WasiContext::builder().args(options.run.args.iter().cloned());
    for mapping in &options.run.files {
        ctx = ctx.file(mapping.path.clone(), virtual_file(mapping)?);
    }

    let mut linker = Linker::new();
    wasi::add_to_linker(&mut linker, Rc::new(ctx.build()));
    linker.link_function(
        "Math",
        "random",
        |_, _| Ok(vec![Value::F64(rand::random())]),
        FunctionType::new(vec![], vec![ValueType::F64]),
    );

    let mut store = Store::with_config(options.run.runtime.clone());
    let id = store.instantiate(&module, &linker)?;

    let export = options.run.invoke.as_deref().unwrap_or("_start");
    let func = store.find_function(id, export)?;
    let params = store.func_type(func).map(|ty| ty.params.clone()).unwrap_or_default();
    // Exports with parameters take them from the guest arguments after the program name
    let call_args = params
        .iter()
        .zip(options.run.args.iter().skip(1))
        .map(|(&ty, text)| parse_value(ty, text))
        .collect::<Result<Vec<_>, _>>()?;

    let results = store.invoke(func, &call_args)?;
    if !results.is_empty() {
        println!("{}", format_values(&results));
    }

    if let Some((addr, len)) = options.dump {
        let memory = store.memory(id)?;
        let memory = memory.borrow();
        hex_dump(memory.read_bytes(addr, len)?, addr);
    }
    Ok(())
}

fn main() {
    log_builder().init();
    let result = parse_args(std::env::args().skip(1)).and_then(run);
    if let Err(e) = result {
        eprintln!("wasmbox: {e}");
        std::process::exit(1);
    }
}
