//! Execution tracing for the archimedes cores.
//!
//! The emulator emits one line per retired instruction and one per
//! exception entry. Tracing is off until [`init_trace`] installs a sink;
//! every emit is a no-op before that, so the step loop never pays for a
//! disabled trace beyond one atomic load.
//!
//! Lines are numbered with a retired-instruction counter rather than wall
//! clock time, which is what makes two runs of the same image diffable:
//!
//! ```text
//! [#00000017] 0x00008004 ARM     MOV R0, #1
//! [#00000018] 0x00008008 ARM     SWI #17
//! [#00000018] 0x00008008 !Svc
//! ```

use std::{
    fs::File,
    io::{self, Write},
    sync::atomic::{AtomicU64, Ordering},
    sync::Mutex,
};

use chrono::Local;
use once_cell::sync::OnceCell;

static TRACER: OnceCell<Tracer> = OnceCell::new();

/// Where trace lines go.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum TraceSink {
    /// Console, the default choice while debugging a guest interactively.
    Stdout,

    /// A file in the temp directory named
    /// `archimedes-trace-<date>-<time>.log`.
    File,
}

struct Tracer {
    sink: Mutex<Box<dyn Write + Send>>,
    retired: AtomicU64,
}

impl Tracer {
    fn new(sink: TraceSink) -> Self {
        let sink: Box<dyn Write + Send> = match sink {
            TraceSink::Stdout => Box::new(io::stdout()),
            TraceSink::File => {
                let stamp = Local::now().format("%Y%m%d-%H%M%S");
                let path = std::env::temp_dir().join(format!("archimedes-trace-{stamp}.log"));
                Box::new(File::create(path).unwrap())
            }
        };
        Self {
            sink: Mutex::new(sink),
            retired: AtomicU64::new(0),
        }
    }

    fn emit(&self, line: std::fmt::Arguments<'_>) {
        if let Ok(ref mut sink) = self.sink.lock() {
            let _ = writeln!(sink, "{line}");
        }
    }
}

/// Installs the global trace sink. Calling it twice keeps the first sink.
pub fn init_trace(sink: TraceSink) {
    TRACER.set(Tracer::new(sink)).ok();
}

/// Whether a sink is installed; decoders can skip building disassembly
/// text entirely when it is not.
#[must_use]
pub fn enabled() -> bool {
    TRACER.get().is_some()
}

/// Traces one retired instruction: the fetch address, the instruction set
/// it was decoded under, and its disassembly.
pub fn instruction<I, T>(pc: u64, isa: I, text: T)
where
    I: std::fmt::Display,
    T: std::fmt::Display,
{
    if let Some(tracer) = TRACER.get() {
        let serial = tracer.retired.fetch_add(1, Ordering::Relaxed) + 1;
        tracer.emit(format_args!("[#{serial:08}] 0x{pc:08X} {isa:<7} {text}"));
    }
}

/// Traces an exception entry against the instruction that raised it.
pub fn exception<K>(pc: u64, kind: K)
where
    K: std::fmt::Display,
{
    if let Some(tracer) = TRACER.get() {
        let serial = tracer.retired.load(Ordering::Relaxed);
        tracer.emit(format_args!("[#{serial:08}] 0x{pc:08X} !{kind}"));
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{exception, init_trace, instruction, TraceSink};

    #[test]
    fn trace_file_carries_numbered_lines() {
        init_trace(TraceSink::File);
        instruction(0x8000, "ARM", "MOV R0, #1");
        exception(0x8000, "Svc");

        let dir = std::env::temp_dir();
        let files = fs::read_dir(dir).unwrap();
        for f in files.flatten() {
            let p = f.path();
            let name = p.to_str().unwrap();
            if name.contains("archimedes-trace") {
                let body = fs::read_to_string(p.clone()).unwrap();
                fs::remove_file(p).unwrap();
                assert_eq!(
                    body,
                    "[#00000001] 0x00008000 ARM     MOV R0, #1\n\
                     [#00000001] 0x00008000 !Svc\n"
                );
            }
        }
    }
}
