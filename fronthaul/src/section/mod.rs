//! Section Management
//! 
//! Section descriptors and the N-buffered per-channel database that holds them
//! between the build and transmit phases of a slot.

pub mod db;
pub mod descriptor;

pub use db::{ContextBuilder, DueSections, SectionContext, SectionDatabase};
pub use descriptor::{
    BeamformingMode, SectionDescriptor, SectionFlags, SectionType, SymbolPayload, Type3Params,
};
