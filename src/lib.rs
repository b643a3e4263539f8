//! # mapsan
//! `mapsan` is a runtime consistency sanitizer for heterogeneous
//! (host/device) memory used by offloaded parallel regions. The
//! compiler-instrumented target program reports data-mapping lifecycle
//! events (alloc, copy-to, copy-from, associate, disassociate, release) and
//! instrumented loads / derived pointers into a [`runtime::MapsanRuntime`];
//! the runtime keeps a bidirectional interval registry of host/device
//! ranges plus a per-cell validity shadow and flags reads of bytes whose
//! copy on the accessed side never received a valid value: a data
//! inconsistency, as opposed to a classic data race.
//!
//! The crate is a library: the instrumentation pass and the OMPT-style
//! event glue that translate program behavior into calls on the runtime
//! are external collaborators.
pub mod event;
pub mod interval;
pub mod registry;
pub mod report;
pub mod runtime;
pub mod scope;
pub mod shadow;
pub mod symbols;

/// An address in the instrumented process (host or device side).
pub type Addr = usize;

pub use event::MapFlags;
pub use interval::Interval;
pub use registry::{MapInfo, MappingRegistry, Side};
pub use report::{ErrorCallback, Violation, ViolationKind, ViolationRecord};
pub use runtime::{MapsanRuntime, MapsanRuntimeBuilder};
pub use shadow::{DEFAULT_CELL_SIZE, ValidityShadow};
pub use symbols::{NopSymbols, SourceLocation, Symbols};
