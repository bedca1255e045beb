//! Point-to-point messaging between workers, and the few collectives the
//! simulation needs on top of it.
//!
//! Channels are FIFO per sender, and every worker runs the same sequence of
//! collectives, so a receive only has to match on the source rank. Packets
//! that arrive early from another peer are stashed until asked for.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use tracing::trace;

use crate::error::DistributedError;

/// How long a worker waits on a peer before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Gather,
    Reduce,
    Forward,
    Lines,
}

impl PacketKind {
    fn name(self) -> &'static str {
        match self {
            PacketKind::Gather => "gather",
            PacketKind::Reduce => "reduce",
            PacketKind::Forward => "forward",
            PacketKind::Lines => "lines",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Flags(Vec<bool>),
    Counts(Vec<u64>),
    /// Report lines tagged with the id that orders them.
    Lines(Vec<(usize, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub from: usize,
    pub kind: PacketKind,
    pub payload: Payload,
}

/// Transport between the workers of one run.
pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn send(&self, to: usize, kind: PacketKind, payload: Payload) -> Result<(), DistributedError>;
    /// Next packet from `from`, in the order it was sent.
    fn recv(&mut self, from: usize) -> Result<Packet, DistributedError>;
}

/// In-process transport: one thread per worker, one channel per inbox.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Receiver<Packet>,
    stash: Vec<VecDeque<Packet>>,
    timeout: Duration,
}

impl ThreadComm {
    /// Fully connected group of `size` endpoints; hand endpoint `i` to the
    /// thread running rank `i`.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadComm {
                rank,
                peers: senders.clone(),
                inbox,
                stash: vec![VecDeque::new(); size],
                timeout: DEFAULT_TIMEOUT,
            })
            .collect()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, to: usize, kind: PacketKind, payload: Payload) -> Result<(), DistributedError> {
        let packet = Packet {
            from: self.rank,
            kind,
            payload,
        };
        self.peers[to]
            .send(packet)
            .map_err(|_| DistributedError::Disconnected {
                rank: self.rank,
                peer: to,
            })
    }

    fn recv(&mut self, from: usize) -> Result<Packet, DistributedError> {
        if let Some(p) = self.stash[from].pop_front() {
            return Ok(p);
        }
        loop {
            match self.inbox.recv_timeout(self.timeout) {
                Ok(p) if p.from == from => return Ok(p),
                Ok(p) => {
                    let src = p.from;
                    self.stash[src].push_back(p);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DistributedError::Timeout {
                        rank: self.rank,
                        peer: from,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DistributedError::Disconnected {
                        rank: self.rank,
                        peer: from,
                    })
                }
            }
        }
    }
}

fn expect_flags(rank: usize, p: Packet, kind: PacketKind, len: usize) -> Result<Vec<bool>, DistributedError> {
    match p.payload {
        Payload::Flags(v) if p.kind == kind && v.len() == len => Ok(v),
        _ => Err(DistributedError::Protocol {
            rank,
            peer: p.from,
            expected: kind.name(),
        }),
    }
}

fn expect_counts(rank: usize, p: Packet, kind: PacketKind, len: usize) -> Result<Vec<u64>, DistributedError> {
    match p.payload {
        Payload::Counts(v) if p.kind == kind && v.len() == len => Ok(v),
        _ => Err(DistributedError::Protocol {
            rank,
            peer: p.from,
            expected: kind.name(),
        }),
    }
}

/// Every member publishes `buf` at the indices it owns; afterwards every
/// member holds all of them. `owned[r]` lists rank `r`'s indices.
pub fn all_gather<C: Communicator + ?Sized>(
    comm: &mut C,
    owned: &[Vec<usize>],
    buf: &mut [bool],
) -> Result<(), DistributedError> {
    let rank = comm.rank();
    let mine: Vec<bool> = owned[rank].iter().map(|&i| buf[i]).collect();
    for peer in (0..comm.size()).filter(|&p| p != rank) {
        comm.send(peer, PacketKind::Gather, Payload::Flags(mine.clone()))?;
    }
    for peer in (0..comm.size()).filter(|&p| p != rank) {
        let p = comm.recv(peer)?;
        let flags = expect_flags(rank, p, PacketKind::Gather, owned[peer].len())?;
        for (&i, f) in owned[peer].iter().zip(flags) {
            buf[i] = f;
        }
    }
    trace!(target: "engram::sync", rank, "all-gather done");
    Ok(())
}

/// Element-wise sum of `values` over `members`, delivered to `root` only.
pub fn reduce_sum<C: Communicator + ?Sized>(
    comm: &mut C,
    members: &[usize],
    root: usize,
    values: &[u64],
) -> Result<Option<Vec<u64>>, DistributedError> {
    let rank = comm.rank();
    if rank != root {
        comm.send(root, PacketKind::Reduce, Payload::Counts(values.to_vec()))?;
        return Ok(None);
    }
    let mut total = values.to_vec();
    for &peer in members.iter().filter(|&&p| p != rank) {
        let p = comm.recv(peer)?;
        let counts = expect_counts(rank, p, PacketKind::Reduce, values.len())?;
        for (t, c) in total.iter_mut().zip(counts) {
            *t += c;
        }
    }
    Ok(Some(total))
}

pub fn forward_counts<C: Communicator + ?Sized>(
    comm: &mut C,
    to: usize,
    values: Vec<u64>,
) -> Result<(), DistributedError> {
    comm.send(to, PacketKind::Forward, Payload::Counts(values))
}

pub fn receive_forwarded<C: Communicator + ?Sized>(
    comm: &mut C,
    from: usize,
    len: usize,
) -> Result<Vec<u64>, DistributedError> {
    let rank = comm.rank();
    let p = comm.recv(from)?;
    expect_counts(rank, p, PacketKind::Forward, len)
}

/// Collect every member's keyed lines on `root`, ordered by key. Members
/// hold disjoint keys.
pub fn gather_lines<C: Communicator + ?Sized>(
    comm: &mut C,
    members: &[usize],
    root: usize,
    lines: Vec<(usize, String)>,
) -> Result<Option<Vec<(usize, String)>>, DistributedError> {
    let rank = comm.rank();
    if rank != root {
        comm.send(root, PacketKind::Lines, Payload::Lines(lines))?;
        return Ok(None);
    }
    let mut all = lines;
    for &peer in members.iter().filter(|&&p| p != rank) {
        let p = comm.recv(peer)?;
        match p.payload {
            Payload::Lines(v) if p.kind == PacketKind::Lines => all.extend(v),
            _ => {
                return Err(DistributedError::Protocol {
                    rank,
                    peer: p.from,
                    expected: PacketKind::Lines.name(),
                })
            }
        }
    }
    all.sort_by_key(|(k, _)| *k);
    Ok(Some(all))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_gather_assembles_every_slice() {
        let owned = vec![vec![0, 3], vec![1, 4], vec![2, 5]];
        let comms = ThreadComm::group(3);
        let results: Vec<Vec<bool>> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|mut comm| {
                    let owned = &owned;
                    scope.spawn(move || {
                        let rank = comm.rank();
                        let mut buf = vec![false; 6];
                        // Rank r sets only the first of its indices.
                        buf[owned[rank][0]] = true;
                        all_gather(&mut comm, owned, &mut buf).unwrap();
                        buf
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for buf in results {
            assert_eq!(buf, vec![true, true, true, false, false, false]);
        }
    }

    #[test]
    fn reduce_sums_on_root_only() {
        let comms = ThreadComm::group(4);
        let results: Vec<Option<Vec<u64>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|mut comm| {
                    scope.spawn(move || {
                        let r = comm.rank() as u64;
                        reduce_sum(&mut comm, &[0, 1, 2, 3], 0, &[r, 1]).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], Some(vec![6, 4]));
        assert!(results[1..].iter().all(Option::is_none));
    }

    #[test]
    fn gathered_lines_arrive_in_key_order() {
        let comms = ThreadComm::group(3);
        let results: Vec<Option<Vec<(usize, String)>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|mut comm| {
                    scope.spawn(move || {
                        let r = comm.rank();
                        let mine = vec![(r, format!("l{r}")), (r + 3, format!("l{}", r + 3))];
                        gather_lines(&mut comm, &[0, 1, 2], 0, mine).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let keys: Vec<usize> = results[0].as_ref().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (0..6).collect::<Vec<_>>());
        assert_eq!(results[0].as_ref().unwrap()[4].1, "l4");
        assert!(results[1..].iter().all(Option::is_none));
    }

    #[test]
    fn early_packets_are_stashed_by_source() {
        let mut comms = ThreadComm::group(3);
        let c2 = comms.pop().unwrap();
        let c1 = comms.pop().unwrap();
        let mut c0 = comms.pop().unwrap();
        c2.send(0, PacketKind::Forward, Payload::Counts(vec![2])).unwrap();
        c1.send(0, PacketKind::Forward, Payload::Counts(vec![1])).unwrap();
        assert_eq!(receive_forwarded(&mut c0, 1, 1).unwrap(), vec![1]);
        assert_eq!(receive_forwarded(&mut c0, 2, 1).unwrap(), vec![2]);
    }

    #[test]
    fn wrong_packet_kind_is_a_protocol_error() {
        let mut comms = ThreadComm::group(2);
        let c1 = comms.pop().unwrap();
        let mut c0 = comms.pop().unwrap();
        c1.send(0, PacketKind::Gather, Payload::Flags(vec![true])).unwrap();
        let err = receive_forwarded(&mut c0, 1, 1).unwrap_err();
        assert!(matches!(err, DistributedError::Protocol { peer: 1, .. }));
    }

    #[test]
    fn silent_peer_times_out() {
        let mut comms = ThreadComm::group(2);
        let _c1 = comms.pop().unwrap();
        let mut c0 = comms.pop().unwrap().with_timeout(Duration::from_millis(20));
        let err = c0.recv(1).unwrap_err();
        assert!(matches!(err, DistributedError::Timeout { rank: 0, peer: 1 }));
    }
}
