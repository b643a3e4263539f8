//! # report
//! Structured violation records and their human-readable rendering. A
//! report never changes control flow of the instrumented program: the
//! default sink renders to stderr and execution continues (the same
//! report-and-continue policy as the surrounding race detector), while
//! embedders may install an [`ErrorCallback`] to capture records instead.
use core::fmt;
use std::{
    io::{self, Write},
    time::SystemTime,
};

use backtrace::Backtrace;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::{
    Addr,
    interval::Interval,
    registry::Side,
    scope::{self, ScopeFrame},
    symbols::SourceLocation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Inconsistency,
    OutOfBound,
    Protocol,
}

impl ViolationKind {
    pub fn description(&self) -> &'static str {
        match self {
            ViolationKind::Inconsistency => "data-inconsistency read",
            ViolationKind::OutOfBound => "out-of-bound access",
            ViolationKind::Protocol => "mapping protocol violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A read of bytes whose copy on the accessed side never received a
    /// valid value since the last mapping transition.
    Inconsistency {
        addr: Addr,
        len: usize,
        side: Side,
        name: Option<String>,
    },
    /// A pointer derived from a tracked base escaped the registered range.
    OutOfBound {
        base: Addr,
        derived: Addr,
        len: usize,
        mapped: Interval,
    },
    /// The calling instrumentation/runtime broke a tracker precondition.
    Protocol { addr: Addr, reason: String },
}

impl Violation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::Inconsistency { .. } => ViolationKind::Inconsistency,
            Violation::OutOfBound { .. } => ViolationKind::OutOfBound,
            Violation::Protocol { .. } => ViolationKind::Protocol,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Inconsistency {
                addr, len, side, ..
            } => write!(
                f,
                "read of size {len} at {addr:#x} with no valid value on the {side} side"
            ),
            Violation::OutOfBound {
                base,
                derived,
                len,
                mapped,
            } => write!(
                f,
                "access of size {len} at {derived:#x} escapes the range {mapped} mapped for base {base:#x}"
            ),
            Violation::Protocol { addr, reason } => write!(f, "{reason} ({addr:#x})"),
        }
    }
}

/// One detected violation with its full context. Records are kept in
/// memory (no deduplication) in addition to being rendered or passed to
/// the callback.
#[derive(Debug, Clone)]
pub struct ViolationRecord {
    pub violation: Violation,
    pub pc: Addr,
    pub pid: u32,
    pub tid: u64,
    pub scopes: Vec<ScopeFrame>,
    pub backtrace: Backtrace,
    pub location: Option<SourceLocation>,
    pub timestamp: SystemTime,
}

impl ViolationRecord {
    pub fn new(violation: Violation, pc: Addr, location: Option<SourceLocation>) -> Self {
        ViolationRecord {
            violation,
            pc,
            pid: std::process::id(),
            tid: gettid(),
            scopes: scope::current_stack(),
            backtrace: Backtrace::new(),
            location,
            timestamp: SystemTime::now(),
        }
    }

    pub fn kind(&self) -> ViolationKind {
        self.violation.kind()
    }
}

type ErrorCallbackFn = Box<dyn FnMut(&ViolationRecord) + Send>;

/// Replaces stderr rendering when installed on the runtime builder.
pub struct ErrorCallback(ErrorCallbackFn);

impl ErrorCallback {
    #[must_use]
    pub fn new(callback: ErrorCallbackFn) -> Self {
        Self(callback)
    }

    pub fn call(&mut self, record: &ViolationRecord) {
        (self.0)(record);
    }
}

impl fmt::Debug for ErrorCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCallback").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub(crate) struct Reporter {
    callback: Option<ErrorCallback>,
    records: Vec<ViolationRecord>,
    verbose: bool,
}

impl Reporter {
    pub fn new(callback: Option<ErrorCallback>, verbose: bool) -> Self {
        Reporter {
            callback,
            records: Vec::new(),
            verbose,
        }
    }

    pub fn report(&mut self, record: ViolationRecord) {
        if let Some(callback) = self.callback.as_mut() {
            callback.call(&record);
        } else {
            render(&record, self.verbose).ok();
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[ViolationRecord] {
        &self.records
    }
}

fn render(record: &ViolationRecord, verbose: bool) -> io::Result<()> {
    let mut out = StandardStream::stderr(ColorChoice::Auto);
    writeln!(
        out,
        "================================================================="
    )?;
    out.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
    writeln!(out, "Mapsan: {} at pc {:#x}", record.violation, record.pc)?;
    out.reset()?;
    writeln!(out, "(pid {}, thread {})", record.pid, record.tid)?;
    if let Violation::Inconsistency { name, side, .. } = &record.violation {
        match name {
            Some(name) => writeln!(
                out,
                "Location is the {side} copy of the mapped block '{name}'"
            )?,
            None => writeln!(out, "Location is the {side} copy of an unnamed mapped block")?,
        }
    }
    for (i, frame) in record.scopes.iter().rev().enumerate() {
        writeln!(out, "\t#{i} {} {:#x}", frame.api, frame.pc)?;
    }
    if verbose {
        writeln!(out, "{:?}", record.backtrace)?;
    }
    match &record.location {
        Some(location) => writeln!(
            out,
            "SUMMARY: mapsan: {} {location}",
            record.kind().description()
        ),
        None => writeln!(
            out,
            "SUMMARY: mapsan: {} pc {:#x}",
            record.kind().description(),
            record.pc
        ),
    }
}

#[cfg(target_os = "linux")]
fn gettid() -> u64 {
    (unsafe { libc::gettid() }) as u64
}

#[cfg(not(target_os = "linux"))]
fn gettid() -> u64 {
    0
}
