//! # event
//! Lifecycle event flags for a single mapping directive. One directive may
//! combine several operations (e.g. `ALLOC | ASSOCIATE | TO` on first entry
//! into a mapped region); the dispatcher evaluates them in a fixed order.
use bitflags::bitflags;

bitflags! {
    /// Bit values follow the OMPT device memory flag encoding, so the event
    /// glue can forward the callback argument unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u8 {
        const TO = 0x01;
        const FROM = 0x02;
        const ALLOC = 0x04;
        const RELEASE = 0x08;
        const ASSOCIATE = 0x10;
        const DISASSOCIATE = 0x20;
    }
}
