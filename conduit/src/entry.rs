use std::sync::Arc;

use crate::buffer::{BufferHolder, BufferKind};
use crate::handler::{BufferSpec, Capabilities, Direction, Handler};

/// Stable identity of an entry, unique for the lifetime of its pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(pub(crate) u64);

/// A named slot of the chain: the handler plus its per-direction input holders.
pub(crate) struct Entry {
    pub(crate) id: EntryId,
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) caps: Capabilities,
    /// Set for handlers that may be bound to one entry at a time.
    pub(crate) exclusive: bool,
    pub(crate) inbound_spec: Option<BufferSpec>,
    pub(crate) outbound_spec: Option<BufferSpec>,
    pub(crate) inbound: Option<BufferHolder>,
    pub(crate) outbound: Option<BufferHolder>,
}

impl Entry {
    /// Builds an entry and allocates fresh holders for every declared direction.
    pub(crate) fn new(id: EntryId, name: String, handler: Arc<dyn Handler>) -> Self {
        let inbound_spec = handler.inbound();
        let outbound_spec = handler.outbound();
        let caps = Capabilities::of(handler.as_ref());
        let exclusive = !handler.is_sharable();
        Self {
            id,
            name,
            inbound: inbound_spec.map(|spec| BufferHolder::new(spec.input)),
            outbound: outbound_spec.map(|spec| BufferHolder::new(spec.input)),
            handler,
            caps,
            exclusive,
            inbound_spec,
            outbound_spec,
        }
    }

    /// Builds the entry taking the place of `old`, adopting its holders where the kinds
    /// agree. Returns the entry and, per direction, whether the old holder was adopted.
    pub(crate) fn replacing(
        id: EntryId,
        name: String,
        handler: Arc<dyn Handler>,
        old: &Entry,
    ) -> (Self, bool, bool) {
        let mut entry = Self::new(id, name, handler);
        let adopt_in = adopt(&mut entry.inbound, old.inbound.as_ref());
        let adopt_out = adopt(&mut entry.outbound, old.outbound.as_ref());
        (entry, adopt_in, adopt_out)
    }

    pub(crate) fn spec(&self, direction: Direction) -> Option<BufferSpec> {
        match direction {
            Direction::Inbound => self.inbound_spec,
            Direction::Outbound => self.outbound_spec,
        }
    }

    pub(crate) fn holder(&self, direction: Direction) -> Option<&BufferHolder> {
        match direction {
            Direction::Inbound => self.inbound.as_ref(),
            Direction::Outbound => self.outbound.as_ref(),
        }
    }

    pub(crate) fn handles(&self, direction: Direction) -> bool {
        self.caps.contains(direction)
    }

    /// Address of the handler allocation, used as its binding key.
    pub(crate) fn handler_key(&self) -> usize {
        handler_key(&self.handler)
    }
}

pub(crate) fn handler_key(handler: &Arc<dyn Handler>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

fn adopt(slot: &mut Option<BufferHolder>, old: Option<&BufferHolder>) -> bool {
    let kind = slot.as_ref().map(BufferHolder::kind);
    match old {
        Some(old) if kind == Some(old.kind()) => {
            *slot = Some(old.clone());
            true
        }
        _ => false,
    }
}

/// An immutable snapshot of the chain, head side first.
///
/// Mutations never modify a published chain; they build a new one and swap it in.
#[derive(Default)]
pub(crate) struct Chain {
    pub(crate) entries: Vec<Arc<Entry>>,
}

impl Chain {
    pub(crate) fn new(entries: Vec<Arc<Entry>>) -> Self {
        Self { entries }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub(crate) fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub(crate) fn contains_id(&self, id: EntryId) -> bool {
        self.position(id).is_some()
    }

    /// Positions visited after `index` when travelling in `direction`, nearest first.
    ///
    /// `index` may be `None` for the boundary an event enters from: the head for inbound,
    /// the tail for outbound.
    pub(crate) fn after(
        &self,
        index: Option<usize>,
        direction: Direction,
    ) -> Box<dyn Iterator<Item = &Arc<Entry>> + '_> {
        match direction {
            Direction::Inbound => {
                let start = index.map_or(0, |i| i + 1);
                Box::new(self.entries.iter().skip(start))
            }
            Direction::Outbound => {
                let end = index.unwrap_or(self.entries.len());
                Box::new(self.entries[..end].iter().rev())
            }
        }
    }

    /// Positions visited before `index` when travelling in `direction`, nearest first.
    pub(crate) fn before(
        &self,
        index: usize,
        direction: Direction,
    ) -> Box<dyn Iterator<Item = &Arc<Entry>> + '_> {
        self.after(Some(index), direction.reverse())
    }

    /// Next entry after `index` that takes part in `direction`.
    pub(crate) fn next_handling(
        &self,
        index: Option<usize>,
        direction: Direction,
    ) -> Option<&Arc<Entry>> {
        self.after(index, direction).find(|e| e.handles(direction))
    }

    /// Next holder after `index` in `direction` whose kind is `kind`.
    pub(crate) fn next_holder(
        &self,
        index: Option<usize>,
        direction: Direction,
        kind: BufferKind,
    ) -> Option<(&Arc<Entry>, &BufferHolder)> {
        self.after(index, direction).find_map(|e| {
            e.holder(direction)
                .filter(|h| h.kind() == kind)
                .map(|h| (e, h))
        })
    }
}

impl Direction {
    pub(crate) fn reverse(self) -> Self {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
        }
    }
}
