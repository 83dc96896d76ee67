//! Block-pipelined neighbour channels for particle migration.
//!
//! Each directed channel owns a ring of fixed-capacity blocks. The
//! sender fills the current block particle by particle and posts a
//! non-blocking send whenever a block fills; the receiver keeps a
//! receive posted on every block, hands completed blocks to the caller,
//! and re-posts them on release. The combination of communicator group,
//! tag and neighbour rank must be unique per channel; in a Cartesian
//! topology only two processes sharing two opposite faces threaten that
//! uniqueness, which is why upward and downward traffic carry distinct
//! direction tags.
//!
//! A channel's stream ends with a *final* block, by default any block
//! shorter than the capacity (`send_complete` always emits one, possibly
//! empty). The out-of-band variant instead piggy-backs a typed flag
//! record onto every block.
//!
//! A NULL neighbour is rewritten to a loopback self-channel with the
//! reserved self tag, so boundary wrap takes the same code path as
//! ordinary neighbour traffic. Loopback channels move blocks through an
//! in-process queue and never touch MPI, which keeps single-rank runs
//! and tests free of the runtime.
//!
//! The ring holds its requests across calls, which the safe request
//! scopes of the `mpi` crate cannot express; the transport therefore
//! drives `mpi::ffi` directly, and teardown cancels and frees every
//! pending request.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem::MaybeUninit;
use std::os::raw::{c_int, c_void};
use std::rc::Rc;

use mpi::ffi;

use crate::particle::SpeciesParticle;

/// Message tags distinguishing the directed channels between a pair of
/// processes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Direction {
    Default = 0,
    ParticleDn = 1,
    ParticleUp = 2,
    XDn = 3,
    XUp = 4,
    YDn = 5,
    YUp = 6,
    ZDn = 7,
    ZUp = 8,
    /// Reserved tag for channels rewritten to self-communication.
    SelfChannel = 9,
}

/// Elements that can travel in a block: a fixed number of doubles per
/// record, plus an encoding for the optional out-of-band flag record.
pub trait WireRecord: Copy {
    const DOUBLES: usize;
    fn flag_record(signal: i32, comm_id: i32) -> Self;
    fn read_flag(&self) -> (i32, i32);
}

impl WireRecord for SpeciesParticle {
    const DOUBLES: usize = 8;

    fn flag_record(signal: i32, comm_id: i32) -> SpeciesParticle {
        SpeciesParticle::new(signal as f64, comm_id as f64, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    }

    fn read_flag(&self) -> (i32, i32) {
        (self.u as i32, self.v as i32)
    }
}

/// Back-pressure policy when the next ring block is still in flight.
/// Waiting is canonical; inserting fresh blocks trades memory for
/// latency.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BlockPolicy {
    WaitOnFull,
    InsertOnFull,
}

/// How the end of a per-step stream is signalled.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FinalSignal {
    /// The final block is shorter than the capacity (default).
    ShortBlock,
    /// Every block carries a trailing flag record.
    FlagElement,
}

type LoopQueue<T> = Rc<RefCell<VecDeque<Vec<T>>>>;

/// One end of a channel: an MPI peer or an in-process loopback queue.
pub enum Connection<T> {
    Mpi {
        rank: i32,
        tag: i32,
        comm: ffi::MPI_Comm,
    },
    Loopback(LoopQueue<T>),
}

impl<T> Connection<T> {
    pub fn remote(rank: i32, dir: Direction, comm: ffi::MPI_Comm) -> Connection<T> {
        Connection::Mpi {
            rank,
            tag: dir as i32,
            comm,
        }
    }

    /// Paired send and receive ends of a self-channel.
    pub fn self_channel() -> (Connection<T>, Connection<T>) {
        let queue: LoopQueue<T> = Rc::new(RefCell::new(VecDeque::new()));
        (
            Connection::Loopback(queue.clone()),
            Connection::Loopback(queue),
        )
    }

    fn is_loopback(&self) -> bool {
        matches!(self, Connection::Loopback(_))
    }
}

const INSERT_FLAG: i32 = 1;
const FINISHED_FLAG: i32 = 2;

struct Block<T> {
    buf: Vec<T>,
    capacity: usize,
    #[allow(dead_code)]
    list_id: usize,
    request: Option<ffi::MPI_Request>,
    /// Completed-receive element count, set by `test_recv`.
    received: Option<usize>,
    finished: bool,
    /// Sender inserted a block; the receiver should grow its ring too.
    insert_requested: bool,
    /// A receive is posted on this block. Loopback completion tests may
    /// consume the shared queue only on the receive side; a send-side
    /// block completes the moment its payload is enqueued.
    pending_recv: bool,
}

impl<T: WireRecord> Block<T> {
    fn new(capacity: usize, list_id: usize) -> Block<T> {
        Block {
            buf: Vec::with_capacity(capacity + 1),
            capacity,
            list_id,
            request: None,
            received: None,
            finished: false,
            insert_requested: false,
            pending_recv: false,
        }
    }

    fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    fn is_active(&self) -> bool {
        self.request.is_some()
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.request = None;
        self.received = None;
        self.finished = false;
        self.insert_requested = false;
        self.pending_recv = false;
    }

    /// Hand the block to the connection. Loopback delivery completes
    /// immediately; MPI delivery leaves a pending request behind.
    fn send(&mut self, conn: &Connection<T>, comm_id: usize, signal: FinalSignal) {
        self.pending_recv = false;
        if signal == FinalSignal::FlagElement {
            let mut flag = if self.finished { FINISHED_FLAG } else { 0 };
            if self.insert_requested {
                flag |= INSERT_FLAG;
            }
            self.buf.push(T::flag_record(flag, comm_id as i32));
        }
        match conn {
            Connection::Loopback(queue) => {
                queue.borrow_mut().push_back(self.buf.clone());
            }
            Connection::Mpi { rank, tag, comm } => {
                let count = (self.buf.len() * T::DOUBLES) as c_int;
                let mut request = MaybeUninit::<ffi::MPI_Request>::uninit();
                unsafe {
                    ffi::MPI_Isend(
                        self.buf.as_ptr() as *const c_void,
                        count,
                        ffi::RSMPI_DOUBLE,
                        *rank,
                        *tag,
                        *comm,
                        request.as_mut_ptr(),
                    );
                    self.request = Some(request.assume_init());
                }
            }
        }
    }

    /// Post a receive on this block.
    fn post_recv(&mut self, conn: &Connection<T>, signal: FinalSignal) {
        debug_assert!(self.request.is_none());
        self.received = None;
        self.finished = false;
        self.pending_recv = true;
        let slots = match signal {
            FinalSignal::ShortBlock => self.capacity,
            FinalSignal::FlagElement => self.capacity + 1,
        };
        match conn {
            Connection::Loopback(_) => {
                // nothing in flight: completion is tested against the queue
                self.buf.clear();
            }
            Connection::Mpi { rank, tag, comm } => {
                self.buf.resize_with(slots, || T::flag_record(0, 0));
                let count = (slots * T::DOUBLES) as c_int;
                let mut request = MaybeUninit::<ffi::MPI_Request>::uninit();
                unsafe {
                    ffi::MPI_Irecv(
                        self.buf.as_mut_ptr() as *mut c_void,
                        count,
                        ffi::RSMPI_DOUBLE,
                        *rank,
                        *tag,
                        *comm,
                        request.as_mut_ptr(),
                    );
                    self.request = Some(request.assume_init());
                }
            }
        }
    }

    /// Test the pending operation; `true` when nothing is in flight any
    /// more. A completed receive records its element count.
    fn test(&mut self, conn: &Connection<T>) -> bool {
        match conn {
            Connection::Loopback(queue) => {
                if self.received.is_some() {
                    return true;
                }
                // send-side block: delivery completed on enqueue, and the
                // shared queue belongs to the receive end
                if !self.pending_recv {
                    return true;
                }
                let mut q = queue.borrow_mut();
                match q.pop_front() {
                    Some(msg) => {
                        self.buf = msg;
                        self.received = Some(self.buf.len());
                        true
                    }
                    None => false,
                }
            }
            Connection::Mpi { .. } => {
                let mut request = match self.request.take() {
                    None => return true,
                    Some(r) => r,
                };
                let mut flag: c_int = 0;
                let mut status = MaybeUninit::<ffi::MPI_Status>::uninit();
                unsafe {
                    ffi::MPI_Test(&mut request, &mut flag, status.as_mut_ptr());
                }
                if flag == 0 {
                    self.request = Some(request);
                    return false;
                }
                let mut count: c_int = 0;
                unsafe {
                    ffi::MPI_Get_count(status.as_ptr(), ffi::RSMPI_DOUBLE, &mut count);
                }
                if count >= 0 {
                    self.received = Some(count as usize / T::DOUBLES);
                }
                true
            }
        }
    }

    fn wait(&mut self, conn: &Connection<T>) {
        match conn {
            Connection::Loopback(_) => {}
            Connection::Mpi { .. } => {
                if let Some(mut request) = self.request.take() {
                    let mut status = MaybeUninit::<ffi::MPI_Status>::uninit();
                    unsafe {
                        ffi::MPI_Wait(&mut request, status.as_mut_ptr());
                    }
                }
            }
        }
    }

    /// Shrink a completed receive to the real element count; returns
    /// whether this was the stream's final block.
    fn shrink_received(&mut self, signal: FinalSignal) -> bool {
        let mut n = self.received.expect("no completed receive on this block");
        let last = match signal {
            FinalSignal::ShortBlock => n < self.capacity,
            FinalSignal::FlagElement => {
                // trailing flag record carries the end-of-stream bits
                n -= 1;
                let (flag, _comm_id) = self.buf[n].read_flag();
                self.insert_requested = flag & INSERT_FLAG != 0;
                flag & FINISHED_FLAG != 0
            }
        };
        self.buf.truncate(n);
        self.finished = last;
        last
    }
}

impl<T> Drop for Block<T> {
    fn drop(&mut self) {
        if let Some(mut request) = self.request.take() {
            unsafe {
                ffi::MPI_Cancel(&mut request);
                ffi::MPI_Request_free(&mut request);
            }
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum CommState {
    Initial,
    Active,
    Finished,
}

/// A directed block pipeline over one [`Connection`]. One instance per
/// channel; blocks are delivered in send order within the channel, with
/// no ordering across channels.
pub struct BlockCommunicator<T: WireRecord> {
    connection: Connection<T>,
    blocksize: usize,
    blocks: Vec<Block<T>>,
    curr: usize,
    next_list_id: usize,
    next_comm_id: usize,
    state: CommState,
    policy: BlockPolicy,
    final_signal: FinalSignal,
}

impl<T: WireRecord> BlockCommunicator<T> {
    pub fn new(connection: Connection<T>, blocksize: usize, numblocks: usize) -> BlockCommunicator<T> {
        assert!(blocksize > 0);
        assert!(numblocks > 0);
        let blocks = (0..numblocks).map(|id| Block::new(blocksize, id)).collect();
        BlockCommunicator {
            connection,
            blocksize,
            blocks,
            curr: 0,
            next_list_id: numblocks,
            next_comm_id: 0,
            state: CommState::Initial,
            policy: BlockPolicy::WaitOnFull,
            final_signal: FinalSignal::ShortBlock,
        }
    }

    pub fn with_policy(mut self, policy: BlockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_final_signal(mut self, signal: FinalSignal) -> Self {
        self.final_signal = signal;
        self
    }

    pub fn is_loopback(&self) -> bool {
        self.connection.is_loopback()
    }

    fn advance(&mut self) {
        self.curr = (self.curr + 1) % self.blocks.len();
    }

    // --- sending ---

    /// Append one record; returns `true` iff a network send was
    /// initiated during the call.
    pub fn send(&mut self, record: T) -> bool {
        self.blocks[self.curr].buf.push(record);
        if self.blocks[self.curr].is_full() {
            self.send_curr_block();
            return true;
        }
        false
    }

    fn send_curr_block(&mut self) {
        let comm_id = self.next_comm_id;
        self.next_comm_id += 1;
        self.blocks[self.curr].send(&self.connection, comm_id, self.final_signal);
        self.advance();
        self.send_start();
        self.state = CommState::Active;
    }

    /// Make sure the new current block is free for filling: either wait
    /// out its pending send or insert a fresh block in front of it.
    fn send_start(&mut self) {
        if !self.blocks[self.curr].test(&self.connection) {
            match self.policy {
                BlockPolicy::WaitOnFull => {
                    self.blocks[self.curr].wait(&self.connection);
                }
                BlockPolicy::InsertOnFull => {
                    let block = Block::new(self.blocksize, self.next_list_id);
                    self.next_list_id += 1;
                    self.blocks.insert(self.curr, block);
                    // tell the receiver (flag-element streams only) that
                    // the ring grew on this end
                    self.blocks[self.curr].insert_requested = true;
                }
            }
        }
        self.blocks[self.curr].clear();
    }

    /// Flush the remaining records, marking the block final; always
    /// produces a message so the receiver can detect end-of-stream.
    /// Call exactly once per channel per step.
    pub fn send_complete(&mut self) {
        assert!(!self.blocks[self.curr].is_full());
        self.blocks[self.curr].finished = true;
        self.send_curr_block();
        self.state = CommState::Initial;
    }

    // --- receiving ---

    /// Post a receive on every ring block and rewind. Call once per
    /// channel after construction; the ring re-arms itself block by
    /// block as the caller releases them.
    pub fn post_recvs(&mut self) {
        for block in &mut self.blocks {
            debug_assert!(!block.is_active());
            block.post_recv(&self.connection, self.final_signal);
        }
        self.curr = 0;
        self.state = CommState::Initial;
    }

    /// Reset the end-of-stream state for a new step. The receives stay
    /// posted across steps; only the FINISHED marker is cleared.
    pub fn recv_start(&mut self) {
        self.state = CommState::Initial;
    }

    pub fn comm_finished(&self) -> bool {
        self.state == CommState::Finished
    }

    /// Has the current block completed its receive?
    pub fn test_recv(&mut self) -> bool {
        let conn = &self.connection;
        self.blocks[self.curr].test(conn) && self.blocks[self.curr].received.is_some()
    }

    /// Borrow the completed block's records. Marks the channel FINISHED
    /// when the final block arrives, and grows the ring when the sender
    /// asked for more receive buffers.
    pub fn fetch_received_block(&mut self) -> &[T] {
        let signal = self.final_signal;
        let last = self.blocks[self.curr].shrink_received(signal);
        if last {
            self.state = CommState::Finished;
        }
        if self.blocks[self.curr].insert_requested {
            let mut block = Block::new(self.blocksize, self.next_list_id);
            self.next_list_id += 1;
            block.post_recv(&self.connection, signal);
            self.blocks.insert(self.curr, block);
            self.curr += 1;
        }
        &self.blocks[self.curr].buf
    }

    /// Re-post the receive and step to the next ring block.
    pub fn release_received_block(&mut self) {
        let signal = self.final_signal;
        let conn = &self.connection;
        self.blocks[self.curr].clear();
        self.blocks[self.curr].post_recv(conn, signal);
        self.advance();
    }

    /// Drain every available block into `out`; returns once the channel
    /// reports FINISHED (so only call this when the sender's
    /// `send_complete` is guaranteed to arrive).
    pub fn recv_all(&mut self, out: &mut Vec<T>) {
        while !self.comm_finished() {
            if self.test_recv() {
                out.extend_from_slice(self.fetch_received_block());
                self.release_received_block();
            }
        }
    }

    /// Cancel and free every pending receive (teardown path; `Drop` on
    /// the blocks does the same for anything left over).
    pub fn cancel_recvs(&mut self) {
        for block in &mut self.blocks {
            if let Some(mut request) = block.request.take() {
                unsafe {
                    ffi::MPI_Cancel(&mut request);
                    ffi::MPI_Request_free(&mut request);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcl(i: usize) -> SpeciesParticle {
        SpeciesParticle::new(
            i as f64,
            2.0 * i as f64,
            0.5,
            1.0,
            0.25 * i as f64,
            0.5,
            0.75,
            i as f64,
        )
    }

    /// Lossless in-order delivery over a self-channel, with exactly one
    /// FINISHED signal, for a stream ten times the block capacity.
    #[test]
    fn self_loop_round_trip() {
        let capacity = 16;
        let (tx_conn, rx_conn) = Connection::self_channel();
        let mut tx = BlockCommunicator::new(tx_conn, capacity, 3);
        let mut rx = BlockCommunicator::new(rx_conn, capacity, 3);
        rx.post_recvs();

        let n = 10 * capacity;
        let mut sends_started = 0;
        for i in 0..n {
            if tx.send(pcl(i)) {
                sends_started += 1;
            }
        }
        assert_eq!(sends_started, 10);
        tx.send_complete();

        let mut got = Vec::new();
        let mut finished_signals = 0;
        while !rx.comm_finished() {
            if rx.test_recv() {
                got.extend_from_slice(rx.fetch_received_block());
                if rx.comm_finished() {
                    finished_signals += 1;
                }
                rx.release_received_block();
            }
        }
        assert_eq!(finished_signals, 1);
        assert_eq!(got.len(), n);
        for (i, p) in got.iter().enumerate() {
            assert_eq!(p.t, i as f64);
            assert_eq!(p.x, 0.25 * i as f64);
        }
    }

    /// An empty stream still produces exactly one (empty, final) block.
    #[test]
    fn empty_stream_finishes() {
        let (tx_conn, rx_conn) = Connection::self_channel();
        let mut tx = BlockCommunicator::<SpeciesParticle>::new(tx_conn, 8, 2);
        let mut rx = BlockCommunicator::<SpeciesParticle>::new(rx_conn, 8, 2);
        rx.post_recvs();
        tx.send_complete();
        let mut got = Vec::new();
        rx.recv_all(&mut got);
        assert!(got.is_empty());
        assert!(rx.comm_finished());
    }

    /// The flag-element variant survives a stream whose final block is
    /// completely full.
    #[test]
    fn flag_element_final_signal() {
        let capacity = 8;
        let (tx_conn, rx_conn) = Connection::self_channel();
        let mut tx = BlockCommunicator::new(tx_conn, capacity, 2)
            .with_final_signal(FinalSignal::FlagElement);
        let mut rx = BlockCommunicator::new(rx_conn, capacity, 2)
            .with_final_signal(FinalSignal::FlagElement);
        rx.post_recvs();

        for i in 0..capacity {
            tx.send(pcl(i));
        }
        tx.send_complete();

        let mut got = Vec::new();
        rx.recv_all(&mut got);
        assert_eq!(got.len(), capacity);
        assert!(rx.comm_finished());
        // the flag records never reach the caller
        for (i, p) in got.iter().enumerate() {
            assert_eq!(p.t, i as f64);
        }
    }

    /// Two consecutive steps over the same channel: the ring re-arms.
    #[test]
    fn channel_reuse_across_steps() {
        let (tx_conn, rx_conn) = Connection::self_channel();
        let mut tx = BlockCommunicator::new(tx_conn, 4, 2);
        let mut rx = BlockCommunicator::new(rx_conn, 4, 2);
        rx.post_recvs();

        for step in 0..2 {
            rx.recv_start();
            let n = 6 + step;
            for i in 0..n {
                tx.send(pcl(i));
            }
            tx.send_complete();
            let mut got = Vec::new();
            rx.recv_all(&mut got);
            assert_eq!(got.len(), n);
        }
    }
}
