//! # runtime
//! [`MapsanRuntime`] is the explicit tracker context: it owns the mapping
//! registry pair behind one mutex and the validity shadow, dispatches
//! lifecycle events as one logical transaction, and performs the bounds and
//! validity checks for instrumented accesses. It is constructed once by the
//! embedding collaborator and passed by shared handle into every entry
//! point; all entry points take `&self` and are safe to call from any
//! thread.
//!
//! Error policy (per taxonomy): consistency and bound violations are
//! reported and execution continues; protocol violations (the calling
//! instrumentation broke a precondition) are reported and then panic, since
//! continuing would operate on an invalid mapping record.
use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, warn};

use crate::{
    Addr,
    event::MapFlags,
    interval::Interval,
    registry::{MapInfo, MappingRegistry, Side},
    report::{ErrorCallback, Reporter, Violation, ViolationRecord},
    scope::ScopedAnnotation,
    shadow::{DEFAULT_CELL_SIZE, ShadowError, ValidityShadow},
    symbols::{NopSymbols, Symbols},
};

#[derive(Debug)]
pub struct MapsanRuntimeBuilder {
    cell_size: usize,
    enabled: bool,
    halt_on_error: bool,
    verbose: bool,
    symbols: Box<dyn Symbols>,
    error_callback: Option<ErrorCallback>,
}

impl MapsanRuntimeBuilder {
    /// Shadow cell granule in bytes; must be a power of two.
    #[must_use]
    pub fn cell_size(mut self, cell_size: usize) -> Self {
        self.cell_size = cell_size;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Abort the process after the first reported violation instead of the
    /// default report-and-continue policy.
    #[must_use]
    pub fn halt_on_error(mut self, halt_on_error: bool) -> Self {
        self.halt_on_error = halt_on_error;
        self
    }

    /// Include the native backtrace in rendered reports.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn symbols(mut self, symbols: impl Symbols + 'static) -> Self {
        self.symbols = Box::new(symbols);
        self
    }

    /// Capture violation records instead of rendering them to stderr.
    #[must_use]
    pub fn error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }

    pub fn build(self) -> Result<MapsanRuntime, ShadowError> {
        Ok(MapsanRuntime {
            registry: Mutex::new(MappingRegistry::new()),
            shadow: ValidityShadow::new(self.cell_size)?,
            reporter: Mutex::new(Reporter::new(self.error_callback, self.verbose)),
            symbols: self.symbols,
            enabled: AtomicBool::new(self.enabled),
            halt_on_error: self.halt_on_error,
        })
    }
}

impl Default for MapsanRuntimeBuilder {
    fn default() -> Self {
        MapsanRuntimeBuilder {
            cell_size: DEFAULT_CELL_SIZE,
            enabled: true,
            halt_on_error: false,
            verbose: false,
            symbols: Box::new(NopSymbols),
            error_callback: None,
        }
    }
}

#[derive(Debug)]
pub struct MapsanRuntime {
    registry: Mutex<MappingRegistry>,
    shadow: ValidityShadow,
    reporter: Mutex<Reporter>,
    symbols: Box<dyn Symbols>,
    enabled: AtomicBool,
    halt_on_error: bool,
}

/// A checked access translated to the host-keyed shadow.
struct ResolvedAccess {
    side: Side,
    host_range: Interval,
    accessed_begin: Addr,
    name: Option<String>,
}

impl ResolvedAccess {
    /// Maps an invalid host-side cell address back to the address space the
    /// access used.
    fn accessed_addr(&self, host_cell: Addr) -> Addr {
        self.accessed_begin + (host_cell - self.host_range.begin)
    }
}

impl MapsanRuntime {
    #[must_use]
    pub fn builder() -> MapsanRuntimeBuilder {
        MapsanRuntimeBuilder::default()
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Applies one mapping directive to the registry and the shadow. Flags
    /// are evaluated in the fixed order Alloc → Associate → To → From →
    /// Disassociate → Release: later steps' registry lookups depend on
    /// earlier steps having registered the mapping.
    ///
    /// The caller must only report completed lifecycle steps; the tracker
    /// has no notion of an in-flight transfer.
    pub fn notify_mapping(
        &self,
        flags: MapFlags,
        host_addr: Addr,
        device_addr: Addr,
        len: usize,
        pc: Addr,
        name: Option<&str>,
    ) {
        if !self.enabled() {
            return;
        }
        let _scope = ScopedAnnotation::enter("notify_mapping", pc);
        debug!(
            "notify_mapping - flags: {flags:?}, host: {host_addr:#x}, device: {device_addr:#x}, len: {len:#x}, pc: {pc:#x}"
        );

        if len == 0
            || host_addr.checked_add(len).is_none()
            || device_addr.checked_add(len).is_none()
        {
            self.protocol_violation(
                host_addr,
                format!("invalid mapping extent of length {len:#x}"),
                pc,
            );
        }
        let host = Interval::from_len(host_addr, len);
        let device = Interval::from_len(device_addr, len);

        if flags.contains(MapFlags::ALLOC) {
            self.shadow.reserve(host);
        }

        if flags.contains(MapFlags::ASSOCIATE) {
            let (host_result, device_result) = {
                let mut registry = self.registry.lock().unwrap();
                let host_info = MapInfo::new(device_addr, len, name);
                let mut host_result = registry.insert(Side::Host, host, host_info.clone());
                if host_result.is_err() {
                    // host buffer reuse: drop every stale entry, newest wins
                    registry.remove_overlapping(Side::Host, host);
                    host_result = registry.insert(Side::Host, host, host_info);
                }
                let device_result =
                    registry.insert(Side::Device, device, MapInfo::new(host_addr, len, name));
                (host_result, device_result)
            };
            if let Err(e) = host_result {
                self.protocol_violation(
                    host_addr,
                    format!("[associate] host-side repair failed: {e}"),
                    pc,
                );
            }
            if let Err(e) = device_result {
                self.protocol_violation(
                    device_addr,
                    format!("[associate] device address is already involved in a mapping: {e}"),
                    pc,
                );
            }
            // the host buffer carries the mapped value at association time
            self.shadow.set_host_valid(host);
            if !flags.contains(MapFlags::TO) {
                // associating without copying in does not make the device
                // copy trustworthy
                self.shadow.clear_device_valid(host);
            }
        }

        if flags.contains(MapFlags::TO) {
            match self.device_interval_of(device_addr) {
                None => self.protocol_violation(
                    device_addr,
                    "[to] device address does not involve in any mapping".to_string(),
                    pc,
                ),
                Some(mapped) => {
                    self.check_transfer_bound(mapped, device, len, pc);
                    self.shadow.set_device_valid(host);
                }
            }
        }

        if flags.contains(MapFlags::FROM) {
            match self.device_interval_of(device_addr) {
                None => self.protocol_violation(
                    device_addr,
                    "[from] device address does not involve in any mapping".to_string(),
                    pc,
                ),
                Some(mapped) => {
                    self.check_transfer_bound(mapped, device, len, pc);
                    self.shadow.set_host_valid(host);
                }
            }
        }

        if flags.contains(MapFlags::DISASSOCIATE) {
            let removed = self.registry.lock().unwrap().remove(Side::Device, device_addr);
            if let Err(e) = removed {
                self.protocol_violation(device_addr, format!("[disassociate] {e}"), pc);
            }
        }

        if flags.contains(MapFlags::RELEASE) {
            self.shadow.release(host);
            // the host side is repaired, never asserted
            self.registry.lock().unwrap().remove_overlapping(Side::Host, host);
        }
    }

    /// Validity check for an instrumented load. Reports one inconsistency
    /// per covered cell whose copy on the accessed side holds no valid
    /// value; untracked addresses are ignored. Never blocks and never
    /// mutates validity state.
    pub fn check_access(&self, addr: Addr, len: usize, pc: Addr) {
        if !self.enabled() || len == 0 {
            return;
        }
        let _scope = ScopedAnnotation::enter("check_access", pc);
        debug!("check_access - addr: {addr:#x}, len: {len:#x}, pc: {pc:#x}");
        let Some(access) = self.resolve_access(addr, len) else {
            return;
        };
        for cell in self.shadow.invalid_cells(access.host_range, access.side) {
            self.report(
                Violation::Inconsistency {
                    addr: access.accessed_addr(cell),
                    len,
                    side: access.side,
                    name: access.name.clone(),
                },
                pc,
            );
        }
    }

    /// Validity bookkeeping for an instrumented store: the written copy
    /// now holds a valid value and the counterpart copy is stale until the
    /// next transfer.
    pub fn record_write(&self, addr: Addr, len: usize, pc: Addr) {
        if !self.enabled() || len == 0 {
            return;
        }
        let _scope = ScopedAnnotation::enter("record_write", pc);
        debug!("record_write - addr: {addr:#x}, len: {len:#x}, pc: {pc:#x}");
        let Some(access) = self.resolve_access(addr, len) else {
            return;
        };
        match access.side {
            Side::Device => {
                self.shadow.set_device_valid(access.host_range);
                self.shadow.clear_host_valid(access.host_range);
            }
            Side::Host => {
                self.shadow.set_host_valid(access.host_range);
                self.shadow.clear_device_valid(access.host_range);
            }
        }
    }

    /// Bound check for a pointer derived by arithmetic from a tracked base:
    /// the derived access must stay within the originally registered
    /// `[base, base + len)` range. The range is half-open, so an access at
    /// exactly the end address is a violation.
    pub fn check_bound(&self, base: Addr, derived: Addr, len: usize, pc: Addr) {
        if !self.enabled() {
            return;
        }
        let _scope = ScopedAnnotation::enter("check_bound", pc);
        debug!("check_bound - base: {base:#x}, derived: {derived:#x}, len: {len:#x}, pc: {pc:#x}");
        let mapped = {
            let registry = self.registry.lock().unwrap();
            registry
                .find(Side::Device, base)
                .or_else(|| registry.find(Side::Host, base))
                .map(|(interval, _)| interval)
        };
        let Some(mapped) = mapped else {
            debug!("check_bound - base {base:#x} is not tracked");
            return;
        };
        let escapes = derived < mapped.begin
            || derived.checked_add(len).is_none_or(|end| end > mapped.end);
        if escapes {
            self.report(
                Violation::OutOfBound {
                    base,
                    derived,
                    len,
                    mapped,
                },
                pc,
            );
        }
    }

    /// Teardown sweep: logs every mapping still registered. Advisory only.
    pub fn report_stale_mappings(&self) {
        let registry = self.registry.lock().unwrap();
        for (interval, info) in registry.iter(Side::Device) {
            warn!(
                "stale device mapping {interval} for host {:#x}{}",
                info.counterpart,
                name_suffix(info)
            );
        }
        for (interval, info) in registry.iter(Side::Host) {
            warn!(
                "stale host mapping {interval} for device {:#x}{}",
                info.counterpart,
                name_suffix(info)
            );
        }
    }

    /// Snapshot of every violation reported so far, oldest first.
    #[must_use]
    pub fn violations(&self) -> Vec<ViolationRecord> {
        self.reporter.lock().unwrap().records().to_vec()
    }

    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.reporter.lock().unwrap().records().len()
    }

    #[must_use]
    pub fn mapping_of(&self, side: Side, addr: Addr) -> Option<(Interval, MapInfo)> {
        self.registry
            .lock()
            .unwrap()
            .find(side, addr)
            .map(|(interval, info)| (interval, info.clone()))
    }

    #[must_use]
    pub fn mapping_count(&self, side: Side) -> usize {
        self.registry.lock().unwrap().len(side)
    }

    /// Whether shadow cells exist for a host address.
    #[must_use]
    pub fn tracked(&self, host_addr: Addr) -> bool {
        self.shadow.is_tracked(host_addr)
    }

    #[must_use]
    pub fn cell_size(&self) -> usize {
        self.shadow.cell_size()
    }

    /// Translates an access to the host-keyed shadow: device addresses go
    /// through the device→host record, host addresses check their own
    /// range. Untracked addresses resolve to `None`.
    fn resolve_access(&self, addr: Addr, len: usize) -> Option<ResolvedAccess> {
        let registry = self.registry.lock().unwrap();
        if let Some((interval, info)) = registry.find(Side::Device, addr) {
            let host_begin = info.counterpart + (addr - interval.begin);
            host_begin.checked_add(len)?;
            Some(ResolvedAccess {
                side: Side::Device,
                host_range: Interval::from_len(host_begin, len),
                accessed_begin: addr,
                name: info.name.clone(),
            })
        } else if let Some((_, info)) = registry.find(Side::Host, addr) {
            addr.checked_add(len)?;
            Some(ResolvedAccess {
                side: Side::Host,
                host_range: Interval::from_len(addr, len),
                accessed_begin: addr,
                name: info.name.clone(),
            })
        } else {
            None
        }
    }

    fn device_interval_of(&self, device_addr: Addr) -> Option<Interval> {
        self.registry
            .lock()
            .unwrap()
            .find(Side::Device, device_addr)
            .map(|(interval, _)| interval)
    }

    /// The transferred range must stay inside the record it was looked up
    /// in; a transfer spilling past it reads/writes adjacent mappings.
    fn check_transfer_bound(&self, mapped: Interval, transfer: Interval, len: usize, pc: Addr) {
        if !mapped.contains_interval(&transfer) {
            self.report(
                Violation::OutOfBound {
                    base: mapped.begin,
                    derived: transfer.begin,
                    len,
                    mapped,
                },
                pc,
            );
        }
    }

    fn report(&self, violation: Violation, pc: Addr) {
        let record = ViolationRecord::new(violation, pc, self.symbols.resolve(pc));
        self.reporter.lock().unwrap().report(record);
        if self.halt_on_error {
            std::process::abort();
        }
    }

    fn protocol_violation(&self, addr: Addr, reason: String, pc: Addr) -> ! {
        let violation = Violation::Protocol { addr, reason };
        let message = format!("mapsan: {violation}");
        let record = ViolationRecord::new(violation, pc, self.symbols.resolve(pc));
        self.reporter.lock().unwrap().report(record);
        panic!("{message}");
    }
}

fn name_suffix(info: &MapInfo) -> String {
    info.name
        .as_deref()
        .map(|name| format!(" ('{name}')"))
        .unwrap_or_default()
}
