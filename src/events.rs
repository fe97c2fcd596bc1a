//! Scheduled events: wire format, columnar storage and thread splitting.
//!
//! Events arrive as parallel columns with one-based node, destination,
//! select and shift indices. Before the simulation starts they are split
//! into one intra-node queue per partition plus a single inter-node queue,
//! and every index is rebased to zero-based form. A shift index may
//! legitimately become `-1` after rebasing, meaning "no shift".
//!
//! All intra-node events for a node land in the queue of the partition that
//! owns the node, so each partition can drain its queue without touching
//! state outside its node range. Inter-node transfers all land in the single
//! inter-node queue drained by one writer.

use crate::SimError;

/// Scheduled event types.
///
/// The discriminants are wire-stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Remove individuals from a node.
    Exit = 0,
    /// Introduce new individuals into a node. All individuals enter the
    /// first compartment listed in the select column.
    Enter = 1,
    /// Move individuals between compartments within one node, e.g. aging
    /// into the next age category.
    InternalTransfer = 2,
    /// Move individuals from compartments in one node to compartments in
    /// another node.
    ExternalTransfer = 3,
}

impl TryFrom<i32> for EventKind {
    type Error = SimError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Exit),
            1 => Ok(Self::Enter),
            2 => Ok(Self::InternalTransfer),
            3 => Ok(Self::ExternalTransfer),
            _ => Err(SimError::UndefinedEvent),
        }
    }
}

/// Scheduled events as supplied by the caller, one-based on the boundary.
///
/// Column `i` of the parallel vectors describes event `i`: its kind, the
/// integer day it ripens, the source node, the destination node (meaningful
/// for external transfers only), the number of individuals (`0` means
/// "derive from `proportion`"), the sampling proportion, the select-matrix
/// column and the shift-matrix column (`0` means "no shift").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventList {
    pub event: Vec<i32>,
    pub time: Vec<i32>,
    pub node: Vec<i32>,
    pub dest: Vec<i32>,
    pub n: Vec<i32>,
    pub proportion: Vec<f64>,
    pub select: Vec<i32>,
    pub shift: Vec<i32>,
}

impl EventList {
    pub fn len(&self) -> usize {
        self.event.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event.is_empty()
    }
}

/// Columnar buffer of scheduled events, zero-based.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct EventQueue {
    pub event: Vec<EventKind>,
    pub time: Vec<i32>,
    pub node: Vec<usize>,
    /// Zero-based destination; `-1` where the event has none.
    pub dest: Vec<i32>,
    pub n: Vec<i32>,
    pub proportion: Vec<f64>,
    pub select: Vec<usize>,
    /// Zero-based shift column; `-1` means "no shift".
    pub shift: Vec<i32>,
}

impl EventQueue {
    fn with_capacity(n: usize) -> Self {
        Self {
            event: Vec::with_capacity(n),
            time: Vec::with_capacity(n),
            node: Vec::with_capacity(n),
            dest: Vec::with_capacity(n),
            n: Vec::with_capacity(n),
            proportion: Vec::with_capacity(n),
            select: Vec::with_capacity(n),
            shift: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.event.len()
    }

    /// Copy event `i` of `list`, rebasing every index to zero-based form.
    fn push(&mut self, kind: EventKind, list: &EventList, i: usize) {
        self.event.push(kind);
        self.time.push(list.time[i]);
        self.node.push((list.node[i] - 1) as usize);
        self.dest.push(list.dest[i] - 1);
        self.n.push(list.n[i]);
        self.proportion.push(list.proportion[i]);
        self.select.push((list.select[i] - 1) as usize);
        self.shift.push(list.shift[i] - 1);
    }
}

/// Partition that owns zero-based node `node`.
///
/// The node range of the last partition absorbs the division remainder, so
/// the index is clamped there. The chunk is kept at one node minimum to
/// stay well defined when there are more partitions than nodes.
pub(crate) fn node_partition(node: usize, n_nodes: usize, n_parts: usize) -> usize {
    let chunk = (n_nodes / n_parts).max(1);
    (node / chunk).min(n_parts - 1)
}

/// Node range `[start, end)` owned by partition `part`.
pub(crate) fn partition_range(part: usize, n_nodes: usize, n_parts: usize) -> (usize, usize) {
    let chunk = (n_nodes / n_parts).max(1);
    let start = (part * chunk).min(n_nodes);
    let end = if part + 1 == n_parts {
        n_nodes
    } else {
        ((part + 1) * chunk).min(n_nodes)
    };
    (start, end)
}

/// Split the scheduled events into one intra-node queue per partition plus
/// the single inter-node queue.
///
/// Exit, enter and internal-transfer events for a node go to the queue of
/// the partition owning that node; external transfers all go to the
/// inter-node queue. Input order is preserved within every queue. An
/// unknown event kind fails the split.
pub(crate) fn split_events(
    list: &EventList,
    n_nodes: usize,
    n_parts: usize,
) -> Result<(Vec<EventQueue>, EventQueue), SimError> {
    let mut e1_len = vec![0usize; n_parts];
    let mut e2_len = 0usize;

    for i in 0..list.len() {
        match EventKind::try_from(list.event[i])? {
            EventKind::ExternalTransfer => e2_len += 1,
            _ => e1_len[node_partition((list.node[i] - 1) as usize, n_nodes, n_parts)] += 1,
        }
    }

    let mut e1: Vec<EventQueue> = e1_len
        .iter()
        .map(|&len| EventQueue::with_capacity(len))
        .collect();
    let mut e2 = EventQueue::with_capacity(e2_len);

    for i in 0..list.len() {
        let kind = EventKind::try_from(list.event[i])?;
        match kind {
            EventKind::ExternalTransfer => e2.push(kind, list, i),
            _ => {
                let k = node_partition((list.node[i] - 1) as usize, n_nodes, n_parts);
                e1[k].push(kind, list, i);
            }
        }
    }

    Ok((e1, e2))
}
