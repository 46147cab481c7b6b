//! Socket graph and in-process delivery
//!
//! The fabric owns every socket, pipe, listener and dialer of one engine
//! behind a single mutex. A pipe joins a dialing socket to a listening
//! one; messages move along pipes straight into the peer's receive queue,
//! or into the hands of a receiver already waiting there.
//!
//! Lock order is fabric, then slot. Cancel hooks run without the slot lock
//! held and take the fabric lock themselves.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use msgbridge_core::{kdebug, ktrace, kwarn};
use msgbridge_core::{DialerId, Errno, Flags, ListenerId, Msg, PipeId, SocketId};

use crate::aio::{AioCore, AioRef, CancelFn};
use crate::options::{OptValue, SockOption, SocketOptions};
use crate::protocol::{Protocol, Routing};
use crate::url::Address;

/// Which waiter queue of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Queue {
    Send,
    Recv,
}

pub(crate) struct SocketState {
    pub(crate) protocol: Protocol,
    pub(crate) opts: SocketOptions,
    recv_q: VecDeque<Msg>,
    recv_waiters: VecDeque<AioRef>,
    send_waiters: VecDeque<AioRef>,
    pipes: Vec<PipeId>,
    rr: usize,
    last_pipe: Option<PipeId>,
}

struct Pipe {
    dialer_side: SocketId,
    listener_side: SocketId,
    dialer: DialerId,
    listener: ListenerId,
}

struct ListenerState {
    socket: SocketId,
    addr: Address,
    started: bool,
}

struct DialerState {
    socket: SocketId,
    addr: Address,
    pending: bool,
    pipe: Option<PipeId>,
}

enum Route {
    Delivered,
    Blocked(Msg),
    Failed(Errno, Msg),
}

pub(crate) struct Fabric {
    sockets: BTreeMap<SocketId, SocketState>,
    pipes: HashMap<PipeId, Pipe>,
    listeners: BTreeMap<ListenerId, ListenerState>,
    dialers: BTreeMap<DialerId, DialerState>,
    bound: HashMap<Address, ListenerId>,
    next_id: u32,
    default_recv_buffer: usize,
}

impl Fabric {
    pub(crate) fn new(default_recv_buffer: usize) -> Self {
        Self {
            sockets: BTreeMap::new(),
            pipes: HashMap::new(),
            listeners: BTreeMap::new(),
            dialers: BTreeMap::new(),
            bound: HashMap::new(),
            next_id: 0,
            default_recv_buffer,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    // ------------------------------------------------------------------
    // Sockets
    // ------------------------------------------------------------------

    pub(crate) fn open(&mut self, protocol: Protocol) -> SocketId {
        let id = SocketId::new(self.alloc_id());
        let opts = SocketOptions::new(id.as_u32().to_string(), self.default_recv_buffer);
        self.sockets.insert(
            id,
            SocketState {
                protocol,
                opts,
                recv_q: VecDeque::new(),
                recv_waiters: VecDeque::new(),
                send_waiters: VecDeque::new(),
                pipes: Vec::new(),
                rr: 0,
                last_pipe: None,
            },
        );
        kdebug!("{} opened ({})", id, protocol);
        id
    }

    pub(crate) fn socket(&self, id: SocketId) -> Result<&SocketState, Errno> {
        self.sockets.get(&id).ok_or(Errno::Closed)
    }

    pub(crate) fn socket_ids(&self) -> Vec<SocketId> {
        self.sockets.keys().copied().collect()
    }

    /// Close a socket: fail its waiters with `Closed`, drop its pipes,
    /// listeners and dialers.
    pub(crate) fn close(&mut self, id: SocketId) -> Result<(), Errno> {
        let s = self.sockets.remove(&id).ok_or(Errno::Closed)?;
        for waiter in s.recv_waiters.into_iter().chain(s.send_waiters) {
            waiter.core.finish(Err(Errno::Closed));
        }
        for pipe in s.pipes {
            self.remove_pipe(pipe);
        }
        let listeners: Vec<ListenerId> = self
            .listeners
            .iter()
            .filter(|(_, l)| l.socket == id)
            .map(|(lid, _)| *lid)
            .collect();
        for lid in listeners {
            let _ = self.close_listener(lid);
        }
        let dialers: Vec<DialerId> = self
            .dialers
            .iter()
            .filter(|(_, d)| d.socket == id)
            .map(|(did, _)| *did)
            .collect();
        for did in dialers {
            let _ = self.close_dialer(did);
        }
        kdebug!("{} closed ({} queued messages dropped)", id, s.recv_q.len());
        Ok(())
    }

    pub(crate) fn get_opt(&self, id: SocketId, opt: SockOption) -> Result<OptValue, Errno> {
        let s = self.socket(id)?;
        s.opts.get(opt, s.protocol)
    }

    pub(crate) fn set_opt(
        &mut self,
        id: SocketId,
        opt: SockOption,
        value: OptValue,
    ) -> Result<(), Errno> {
        let s = self.sockets.get_mut(&id).ok_or(Errno::Closed)?;
        s.opts.set(opt, value)?;
        if opt == SockOption::RecvBuffer {
            // A deeper queue may admit blocked senders
            self.pump_peers(id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Send the message attached to `aio`. The cycle has already begun.
    pub(crate) fn submit_send(&mut self, id: SocketId, aio: &AioRef, cancel: CancelFn) {
        let Some(s) = self.sockets.get(&id) else {
            aio.core.finish(Err(Errno::Closed));
            return;
        };
        if !s.protocol.can_send() {
            aio.core.finish(Err(Errno::NotSup));
            return;
        }
        let Some(msg) = aio.take_msg() else {
            aio.core.finish(Err(Errno::Inval));
            return;
        };
        let route = if s.send_waiters.is_empty() {
            self.route(id, msg)
        } else {
            Route::Blocked(msg)
        };
        match route {
            Route::Delivered => {
                aio.core.finish(Ok(()));
            }
            Route::Failed(err, msg) => {
                aio.set_msg(Some(msg));
                aio.core.finish(Err(err));
            }
            Route::Blocked(msg) => {
                aio.set_msg(Some(msg));
                match aio.core.schedule(cancel) {
                    Ok(()) => {
                        if let Some(s) = self.sockets.get_mut(&id) {
                            s.send_waiters.push_back(aio.clone());
                        }
                    }
                    Err(err) => {
                        aio.core.finish(Err(err));
                    }
                }
            }
        }
    }

    /// Receive into `aio`. The cycle has already begun.
    pub(crate) fn submit_recv(&mut self, id: SocketId, aio: &AioRef, cancel: CancelFn) {
        let Some(s) = self.sockets.get_mut(&id) else {
            aio.core.finish(Err(Errno::Closed));
            return;
        };
        if !s.protocol.can_recv() {
            aio.core.finish(Err(Errno::NotSup));
            return;
        }
        if let Some(msg) = s.recv_q.pop_front() {
            let pipe = msg.pipe();
            match aio.core.finish_recv(msg) {
                Ok(()) => s.last_pipe = pipe,
                Err(msg) => s.recv_q.push_front(msg),
            }
        } else {
            match aio.core.schedule(cancel) {
                Ok(()) => s.recv_waiters.push_back(aio.clone()),
                Err(err) => {
                    aio.core.finish(Err(err));
                    return;
                }
            }
        }
        self.pump_peers(id);
    }

    /// Remove a parked waiter and complete it with `err`. No effect if the
    /// waiter already left the queue or has moved on to a later cycle.
    pub(crate) fn cancel_waiter(
        &mut self,
        id: SocketId,
        queue: Queue,
        target: &Weak<AioCore>,
        generation: u64,
        err: Errno,
    ) {
        let Some(core) = target.upgrade() else {
            return;
        };
        if !core.in_cycle(generation) {
            ktrace!("{} {:?} cancel for finished cycle {} ignored", id, queue, generation);
            return;
        }
        let Some(s) = self.sockets.get_mut(&id) else {
            return;
        };
        let list = match queue {
            Queue::Send => &mut s.send_waiters,
            Queue::Recv => &mut s.recv_waiters,
        };
        let Some(pos) = list.iter().position(|w| Arc::ptr_eq(&w.core, &core)) else {
            return;
        };
        if let Some(waiter) = list.remove(pos) {
            ktrace!("{} {:?} waiter canceled: {}", id, queue, err);
            waiter.core.finish(Err(err));
        }
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    fn peer_of(&self, pipe: PipeId, me: SocketId) -> Option<SocketId> {
        self.pipes.get(&pipe).map(|p| {
            if p.dialer_side == me {
                p.listener_side
            } else {
                p.dialer_side
            }
        })
    }

    fn route(&mut self, from: SocketId, msg: Msg) -> Route {
        let Some(s) = self.sockets.get(&from) else {
            return Route::Failed(Errno::Closed, msg);
        };
        let pipes = s.pipes.clone();
        let rr = s.rr;
        let last_pipe = s.last_pipe;

        match s.protocol.routing() {
            Routing::None => Route::Failed(Errno::NotSup, msg),
            Routing::Broadcast => {
                for pipe in pipes {
                    if let Some(peer) = self.peer_of(pipe, from) {
                        if self.deliver(peer, pipe, msg.dup()).is_err() {
                            ktrace!("{} full; broadcast copy dropped", peer);
                        }
                    }
                }
                Route::Delivered
            }
            Routing::RoundRobin => {
                let n = pipes.len();
                let mut msg = msg;
                for i in 0..n {
                    let idx = (rr + i) % n;
                    let pipe = pipes[idx];
                    let Some(peer) = self.peer_of(pipe, from) else {
                        continue;
                    };
                    match self.deliver(peer, pipe, msg) {
                        Ok(()) => {
                            if let Some(s) = self.sockets.get_mut(&from) {
                                s.rr = idx + 1;
                            }
                            return Route::Delivered;
                        }
                        Err(back) => msg = back,
                    }
                }
                Route::Blocked(msg)
            }
            Routing::Reply => {
                let Some(pipe) = msg.pipe().or(last_pipe) else {
                    return Route::Failed(Errno::State, msg);
                };
                let Some(peer) = self.peer_of(pipe, from) else {
                    kdebug!("{} gone; reply from {} dropped", pipe, from);
                    return Route::Delivered;
                };
                match self.deliver(peer, pipe, msg) {
                    Ok(()) => Route::Delivered,
                    Err(back) => Route::Blocked(back),
                }
            }
        }
    }

    /// Hand `msg` to a waiting receiver of `to`, or queue it. Gives the
    /// message back if the queue is full.
    fn deliver(&mut self, to: SocketId, pipe: PipeId, mut msg: Msg) -> Result<(), Msg> {
        let Some(s) = self.sockets.get_mut(&to) else {
            return Ok(());
        };
        let max = s.opts.recv_max_size;
        if max > 0 && msg.len() > max {
            kdebug!("{} dropped {}-byte message (recv-size-max {})", to, msg.len(), max);
            return Ok(());
        }
        msg.set_pipe(Some(pipe));
        while let Some(waiter) = s.recv_waiters.pop_front() {
            match waiter.core.finish_recv(msg) {
                Ok(()) => {
                    s.last_pipe = Some(pipe);
                    return Ok(());
                }
                Err(back) => msg = back,
            }
        }
        if s.recv_q.len() < s.opts.recv_buffer {
            s.recv_q.push_back(msg);
            Ok(())
        } else {
            Err(msg)
        }
    }

    /// Retry `id`'s blocked senders in order until one blocks again.
    fn flush_senders(&mut self, id: SocketId) {
        loop {
            let Some(waiter) = self
                .sockets
                .get(&id)
                .and_then(|s| s.send_waiters.front().cloned())
            else {
                return;
            };
            let outcome = match waiter.take_msg() {
                None => Err(Errno::Inval),
                Some(msg) => match self.route(id, msg) {
                    Route::Delivered => Ok(()),
                    Route::Blocked(msg) => {
                        waiter.set_msg(Some(msg));
                        return;
                    }
                    Route::Failed(err, msg) => {
                        waiter.set_msg(Some(msg));
                        Err(err)
                    }
                },
            };
            if let Some(s) = self.sockets.get_mut(&id) {
                s.send_waiters.pop_front();
            }
            waiter.core.finish(outcome);
        }
    }

    /// Room may have opened in `id`'s queue: let its peers' senders run.
    fn pump_peers(&mut self, id: SocketId) {
        let Some(s) = self.sockets.get(&id) else {
            return;
        };
        let mut peers: Vec<SocketId> = s
            .pipes
            .iter()
            .filter_map(|p| self.peer_of(*p, id))
            .collect();
        peers.sort_unstable();
        peers.dedup();
        for peer in peers {
            self.flush_senders(peer);
        }
    }

    // ------------------------------------------------------------------
    // Pipes
    // ------------------------------------------------------------------

    fn connect(&mut self, dialer: DialerId, listener: ListenerId) -> Result<PipeId, Errno> {
        let ds = self.dialers.get(&dialer).ok_or(Errno::Closed)?.socket;
        let ls = self.listeners.get(&listener).ok_or(Errno::Closed)?.socket;
        let dp = self.socket(ds)?.protocol;
        let lp = self.socket(ls)?.protocol;
        if !dp.accepts(lp) {
            kwarn!("{} ({}) cannot connect to {} ({})", ds, dp, ls, lp);
            return Err(Errno::Proto);
        }

        let id = PipeId::new(self.alloc_id());
        self.pipes.insert(
            id,
            Pipe {
                dialer_side: ds,
                listener_side: ls,
                dialer,
                listener,
            },
        );
        for sid in [ds, ls] {
            if let Some(s) = self.sockets.get_mut(&sid) {
                if !s.pipes.contains(&id) {
                    s.pipes.push(id);
                }
            }
        }
        if let Some(d) = self.dialers.get_mut(&dialer) {
            d.pending = false;
            d.pipe = Some(id);
        }
        kdebug!("{} up: {} -> {}", id, ds, ls);

        self.flush_senders(ds);
        self.flush_senders(ls);
        Ok(id)
    }

    fn remove_pipe(&mut self, id: PipeId) {
        let Some(p) = self.pipes.remove(&id) else {
            return;
        };
        for sid in [p.dialer_side, p.listener_side] {
            if let Some(s) = self.sockets.get_mut(&sid) {
                s.pipes.retain(|x| *x != id);
                if s.last_pipe == Some(id) {
                    s.last_pipe = None;
                }
            }
        }
        if let Some(d) = self.dialers.get_mut(&p.dialer) {
            if d.pipe == Some(id) {
                d.pipe = None;
            }
        }
        kdebug!("{} down", id);
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub(crate) fn create_listener(&mut self, sock: SocketId, url: &str) -> Result<ListenerId, Errno> {
        self.socket(sock)?;
        let addr = Address::parse(url)?;
        let id = ListenerId::new(self.alloc_id());
        self.listeners.insert(
            id,
            ListenerState {
                socket: sock,
                addr,
                started: false,
            },
        );
        Ok(id)
    }

    pub(crate) fn start_listener(&mut self, id: ListenerId) -> Result<(), Errno> {
        let l = self.listeners.get_mut(&id).ok_or(Errno::Closed)?;
        if l.started {
            return Err(Errno::State);
        }
        if self.bound.contains_key(&l.addr) {
            return Err(Errno::AddrInUse);
        }
        l.started = true;
        let addr = l.addr.clone();
        self.bound.insert(addr.clone(), id);
        kdebug!("{} listening on {}", id, addr);

        let pending: Vec<DialerId> = self
            .dialers
            .iter()
            .filter(|(_, d)| d.pending && d.addr == addr)
            .map(|(did, _)| *did)
            .collect();
        for did in pending {
            if let Err(err) = self.connect(did, id) {
                kwarn!("pending {} could not attach to {}: {}", did, addr, err);
                if let Some(d) = self.dialers.get_mut(&did) {
                    d.pending = false;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn close_listener(&mut self, id: ListenerId) -> Result<(), Errno> {
        let l = self.listeners.remove(&id).ok_or(Errno::Closed)?;
        if self.bound.get(&l.addr) == Some(&id) {
            self.bound.remove(&l.addr);
        }
        let pipes: Vec<PipeId> = self
            .pipes
            .iter()
            .filter(|(_, p)| p.listener == id)
            .map(|(pid, _)| *pid)
            .collect();
        for pipe in pipes {
            self.remove_pipe(pipe);
        }
        Ok(())
    }

    pub(crate) fn listener_url(&self, id: ListenerId) -> Result<String, Errno> {
        self.listeners
            .get(&id)
            .map(|l| l.addr.to_string())
            .ok_or(Errno::Closed)
    }

    // ------------------------------------------------------------------
    // Dialers
    // ------------------------------------------------------------------

    pub(crate) fn create_dialer(&mut self, sock: SocketId, url: &str) -> Result<DialerId, Errno> {
        self.socket(sock)?;
        let addr = Address::parse(url)?;
        let id = DialerId::new(self.alloc_id());
        self.dialers.insert(
            id,
            DialerState {
                socket: sock,
                addr,
                pending: false,
                pipe: None,
            },
        );
        Ok(id)
    }

    /// Connect now, or with `NONBLOCK` wait for a listener to appear.
    pub(crate) fn start_dialer(&mut self, id: DialerId, flags: Flags) -> Result<(), Errno> {
        let d = self.dialers.get_mut(&id).ok_or(Errno::Closed)?;
        if d.pending || d.pipe.is_some() {
            return Err(Errno::State);
        }
        match self.bound.get(&d.addr).copied() {
            Some(listener) => self.connect(id, listener).map(|_| ()),
            None if flags.is_nonblocking() => {
                kdebug!("{} pending on {}", id, d.addr);
                d.pending = true;
                Ok(())
            }
            None => Err(Errno::ConnRefused),
        }
    }

    pub(crate) fn close_dialer(&mut self, id: DialerId) -> Result<(), Errno> {
        let d = self.dialers.remove(&id).ok_or(Errno::Closed)?;
        if let Some(pipe) = d.pipe {
            self.remove_pipe(pipe);
        }
        Ok(())
    }

    pub(crate) fn dialer_url(&self, id: DialerId) -> Result<String, Errno> {
        self.dialers
            .get(&id)
            .map(|d| d.addr.to_string())
            .ok_or(Errno::Closed)
    }
}
