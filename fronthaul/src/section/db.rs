//! Section Database
//! 
//! Per-channel ring of contexts, one per in-flight slot. A context is written by a
//! single producer while its slot is being built and only read once published. The
//! locks are never waited on: contention means the build and transmit phases of a
//! slot overlap, which is reported as an error.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use common::types::ChannelKey;
use interfaces::SharedPayload;
use tracing::{debug, trace};

use crate::channel::ChannelLayout;
use crate::section::descriptor::SectionDescriptor;
use crate::FronthaulError;

/// Descriptors of one channel for one slot
#[derive(Debug)]
pub struct SectionContext {
    sections: Vec<SectionDescriptor>,
    capacity: usize,
    slot: Option<u64>,
    payload: Option<SharedPayload>,
}

impl SectionContext {
    fn new(capacity: usize) -> Self {
        Self { sections: Vec::with_capacity(capacity), capacity, slot: None, payload: None }
    }

    /// Drop every descriptor and the payload; keeps the allocation
    pub fn reset(&mut self) {
        self.sections.clear();
        self.slot = None;
        self.payload = None;
    }

    /// Append a descriptor, returning its stable index
    pub fn add_section(&mut self, descriptor: SectionDescriptor) -> Result<usize, FronthaulError> {
        if self.sections.len() >= self.capacity {
            return Err(FronthaulError::CapacityExceeded("section database"));
        }
        self.sections.push(descriptor);
        Ok(self.sections.len() - 1)
    }

    /// Descriptors covering `symbol`, in insertion order
    pub fn iterate_due(&self, symbol: u8) -> DueSections<'_> {
        DueSections { sections: &self.sections, symbol, next: 0 }
    }

    /// Descriptors starting at `symbol`, in insertion order
    pub fn starting_at(&self, symbol: u8) -> impl Iterator<Item = (usize, &SectionDescriptor)> + '_ {
        self.sections
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.symbol_start == symbol)
    }

    pub fn find_by_section_id(&self, section_id: u16) -> Option<&SectionDescriptor> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    /// Descriptor with a given section id that also covers `symbol`
    pub fn find_section(&self, section_id: u16, symbol: u8) -> Option<&SectionDescriptor> {
        self.sections
            .iter()
            .find(|s| s.section_id == section_id && s.covers_symbol(symbol))
    }

    pub fn get(&self, index: usize) -> Option<&SectionDescriptor> {
        self.sections.get(index)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// First symbol and one past the last symbol covered by any section
    pub fn symbol_span(&self) -> Option<(u8, u8)> {
        let begin = self.sections.iter().map(|s| s.symbol_start).min()?;
        let end = self.sections.iter().map(|s| s.symbol_end()).max()?;
        Some((begin, end.min(u8::MAX as u16) as u8))
    }

    /// Absolute slot this context was built for
    pub fn slot(&self) -> Option<u64> {
        self.slot
    }

    pub fn set_slot(&mut self, slot: u64) {
        self.slot = Some(slot);
    }

    pub fn payload(&self) -> Option<&SharedPayload> {
        self.payload.as_ref()
    }

    pub fn attach_payload(&mut self, payload: SharedPayload) {
        self.payload = Some(payload);
    }

    /// Sections covering at least one symbol
    pub fn sections(&self) -> &[SectionDescriptor] {
        &self.sections
    }
}

/// Restartable iterator over the sections due at one symbol
#[derive(Debug, Clone)]
pub struct DueSections<'a> {
    sections: &'a [SectionDescriptor],
    symbol: u8,
    next: usize,
}

impl DueSections<'_> {
    /// Rewind to the first due section
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl<'a> Iterator for DueSections<'a> {
    type Item = (usize, &'a SectionDescriptor);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(section) = self.sections.get(self.next) {
            let index = self.next;
            self.next += 1;
            if section.covers_symbol(self.symbol) {
                return Some((index, section));
            }
        }
        None
    }
}

/// The N-buffered database over every channel
pub struct SectionDatabase {
    layout: ChannelLayout,
    ring_depth: usize,
    contexts: Vec<RwLock<SectionContext>>,
}

impl SectionDatabase {
    pub fn new(layout: &ChannelLayout, ring_depth: usize, max_sections: usize) -> Self {
        let count = layout.channel_count() * ring_depth;
        debug!(
            "Section database: {} channels x {} contexts x {} sections",
            layout.channel_count(),
            ring_depth,
            max_sections
        );
        Self {
            layout: layout.clone(),
            ring_depth,
            contexts: (0..count).map(|_| RwLock::new(SectionContext::new(max_sections))).collect(),
        }
    }

    pub fn ring_depth(&self) -> usize {
        self.ring_depth
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    /// Ring position of an absolute slot
    pub fn context_for_slot(&self, slot: u64) -> usize {
        (slot % self.ring_depth as u64) as usize
    }

    fn cell(&self, key: ChannelKey, context: usize) -> Result<&RwLock<SectionContext>, FronthaulError> {
        if context >= self.ring_depth {
            return Err(FronthaulError::InvalidState(format!("context {} beyond ring", context)));
        }
        let channel = self
            .layout
            .channel_index(key)
            .ok_or_else(|| FronthaulError::InvalidState(format!("no flow for {:?}", key)))?;
        Ok(&self.contexts[channel * self.ring_depth + context])
    }

    /// Read access; fails instead of waiting while the context is being built
    pub fn read(
        &self,
        key: ChannelKey,
        context: usize,
    ) -> Result<RwLockReadGuard<'_, SectionContext>, FronthaulError> {
        match self.cell(key, context)?.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(FronthaulError::InvalidState(format!(
                "context {} of {:?} read during build",
                context, key
            ))),
            Err(TryLockError::Poisoned(_)) => Err(FronthaulError::InvalidState("poisoned context".into())),
        }
    }

    /// Write access; fails instead of waiting while the context is being read
    pub fn write(
        &self,
        key: ChannelKey,
        context: usize,
    ) -> Result<RwLockWriteGuard<'_, SectionContext>, FronthaulError> {
        match self.cell(key, context)?.try_write() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(FronthaulError::InvalidState(format!(
                "context {} of {:?} written during transmit",
                context, key
            ))),
            Err(TryLockError::Poisoned(_)) => Err(FronthaulError::InvalidState("poisoned context".into())),
        }
    }

    /// Zero a context
    pub fn reset_context(&self, key: ChannelKey, context: usize) -> Result<(), FronthaulError> {
        self.write(key, context)?.reset();
        trace!("Reset context {} of {:?}", context, key);
        Ok(())
    }

    /// Validate and append a descriptor to a context
    pub fn add_section(
        &self,
        key: ChannelKey,
        context: usize,
        descriptor: SectionDescriptor,
    ) -> Result<usize, FronthaulError> {
        let prbs = self
            .layout
            .prbs(key.direction, key.carrier)
            .ok_or_else(|| FronthaulError::InvalidState(format!("no carrier {}", key.carrier)))?;
        if descriptor.direction != key.direction {
            return Err(FronthaulError::InvalidDescriptor("direction differs from channel".into()));
        }
        descriptor.validate(prbs)?;
        self.write(key, context)?.add_section(descriptor)
    }

    /// Copy of the descriptor with a given section id
    pub fn find_by_section_id(
        &self,
        key: ChannelKey,
        context: usize,
        section_id: u16,
    ) -> Result<Option<SectionDescriptor>, FronthaulError> {
        Ok(self.read(key, context)?.find_by_section_id(section_id).cloned())
    }

    /// Start building the context of an absolute slot
    pub fn build(&self, key: ChannelKey, slot: u64) -> Result<ContextBuilder<'_>, FronthaulError> {
        let prbs = self
            .layout
            .prbs(key.direction, key.carrier)
            .ok_or_else(|| FronthaulError::InvalidState(format!("no carrier {}", key.carrier)))?;
        let mut guard = self.write(key, self.context_for_slot(slot))?;
        guard.reset();
        guard.set_slot(slot);
        Ok(ContextBuilder { guard, key, prbs })
    }
}

/// Exclusive writer of one context during the build phase
pub struct ContextBuilder<'a> {
    guard: RwLockWriteGuard<'a, SectionContext>,
    key: ChannelKey,
    prbs: u16,
}

impl ContextBuilder<'_> {
    /// Validate and append a descriptor
    pub fn add_section(&mut self, descriptor: SectionDescriptor) -> Result<usize, FronthaulError> {
        if descriptor.direction != self.key.direction {
            return Err(FronthaulError::InvalidDescriptor("direction differs from channel".into()));
        }
        descriptor.validate(self.prbs)?;
        if let Some(payload) = self.guard.payload() {
            let len = payload.len();
            if descriptor.symbols.iter().flatten().any(|p| p.offset + p.len > len) {
                return Err(FronthaulError::InvalidDescriptor("symbol payload beyond buffer".into()));
            }
        }
        self.guard.add_section(descriptor)
    }

    /// Attach the IQ buffer the descriptors' symbol payloads point into
    pub fn attach_payload(&mut self, payload: SharedPayload) {
        self.guard.attach_payload(payload);
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CarrierLayout;
    use bytes::Bytes;
    use common::types::Direction;

    fn database(max_sections: usize) -> SectionDatabase {
        let layout = ChannelLayout::new(
            1,
            vec![CarrierLayout { dl_prbs: 106, ul_prbs: 106, dl_antennas: 2, ul_antennas: 2 }],
        );
        SectionDatabase::new(&layout, 4, max_sections)
    }

    fn dl(antenna: u8) -> ChannelKey {
        ChannelKey::new(0, Direction::Downlink, 0, antenna)
    }

    #[test]
    fn test_capacity() {
        let db = database(4);
        for id in 0..4 {
            let desc = SectionDescriptor::new(id, Direction::Downlink, id * 10, 10, 0, 14);
            assert_eq!(db.add_section(dl(0), 1, desc).unwrap(), id as usize);
        }
        let extra = SectionDescriptor::new(9, Direction::Downlink, 50, 10, 0, 14);
        assert_eq!(
            db.add_section(dl(0), 1, extra),
            Err(FronthaulError::CapacityExceeded("section database"))
        );
        let context = db.read(dl(0), 1).unwrap();
        let ids: Vec<_> = context.iterate_due(3).map(|(_, s)| s.section_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_iterate_due_order() {
        let db = database(8);
        db.add_section(dl(1), 0, SectionDescriptor::new(5, Direction::Downlink, 0, 10, 0, 2)).unwrap();
        db.add_section(dl(1), 0, SectionDescriptor::new(2, Direction::Downlink, 10, 10, 1, 3)).unwrap();
        db.add_section(dl(1), 0, SectionDescriptor::new(8, Direction::Downlink, 20, 10, 4, 1)).unwrap();

        let context = db.read(dl(1), 0).unwrap();
        let mut due = context.iterate_due(1);
        let first: Vec<_> = due.by_ref().map(|(i, _)| i).collect();
        assert_eq!(first, vec![0, 1]);
        assert!(due.next().is_none());
        due.restart();
        assert_eq!(due.map(|(i, _)| i).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(context.iterate_due(13).count(), 0);
        assert_eq!(context.symbol_span(), Some((0, 5)));
        assert_eq!(context.find_by_section_id(8).map(|s| s.prb_start), Some(20));
    }

    #[test]
    fn test_find_section_checks_symbol() {
        let db = database(8);
        db.add_section(dl(0), 0, SectionDescriptor::new(3, Direction::Downlink, 0, 10, 2, 2)).unwrap();
        db.add_section(dl(0), 0, SectionDescriptor::new(3, Direction::Downlink, 40, 10, 6, 1)).unwrap();

        let context = db.read(dl(0), 0).unwrap();
        assert_eq!(context.find_section(3, 3).map(|s| s.prb_start), Some(0));
        assert_eq!(context.find_section(3, 6).map(|s| s.prb_start), Some(40));
        assert!(context.find_section(3, 0).is_none());
        assert!(context.find_section(3, 4).is_none());
        assert!(context.find_section(4, 2).is_none());
    }

    #[test]
    fn test_reset_and_isolation() {
        let db = database(8);
        db.add_section(dl(0), 2, SectionDescriptor::new(1, Direction::Downlink, 0, 10, 0, 1)).unwrap();
        assert_eq!(db.read(dl(1), 2).unwrap().len(), 0);
        assert_eq!(db.read(dl(0), 3).unwrap().len(), 0);
        db.reset_context(dl(0), 2).unwrap();
        assert!(db.read(dl(0), 2).unwrap().is_empty());
        assert!(db.reset_context(dl(0), 4).is_err());
    }

    #[test]
    fn test_phase_violation() {
        let db = database(8);
        let reader = db.read(dl(0), 1).unwrap();
        assert!(matches!(db.build(dl(0), 5), Err(FronthaulError::InvalidState(_))));
        drop(reader);

        let mut builder = db.build(dl(0), 5).unwrap();
        assert!(matches!(db.read(dl(0), 1), Err(FronthaulError::InvalidState(_))));
        builder.attach_payload(SharedPayload::new(Bytes::from(vec![0u8; 960])));
        let desc = SectionDescriptor::new(1, Direction::Downlink, 0, 10, 0, 2)
            .with_symbol_payload(0, 0, 480)
            .with_symbol_payload(1, 480, 480);
        builder.add_section(desc.clone()).unwrap();
        assert!(builder.add_section(desc.with_symbol_payload(1, 600, 480)).is_err());
        drop(builder);

        let context = db.read(dl(0), db.context_for_slot(5)).unwrap();
        assert_eq!(context.slot(), Some(5));
        assert_eq!(context.payload().map(|p| p.len()), Some(960));
    }

    #[test]
    fn test_rejects_invalid_descriptor() {
        let db = database(8);
        let wide = SectionDescriptor::new(1, Direction::Downlink, 100, 10, 0, 1);
        assert!(matches!(db.add_section(dl(0), 0, wide), Err(FronthaulError::InvalidDescriptor(_))));
        let uplink = SectionDescriptor::new(1, Direction::Uplink, 0, 10, 0, 1);
        assert!(db.add_section(dl(0), 0, uplink).is_err());
    }
}
