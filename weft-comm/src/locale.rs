use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, trace};

use crate::memory::{AddressSpace, FnId, FnTable, GlobalsRegistry, PrivateTable};
use crate::message::{Envelope, MsgKind, TagGen, Target};
use crate::transport::{
    comm_check, LocaleId, Tag, Transport, BCAST_TAG, COORDINATOR, ENVELOPE_TAG,
};

/// Reserved private-table slot for the verbose-comm flag.
pub const SLOT_VERBOSE_COMM: usize = 0;
/// Reserved private-table slot for the comm-diagnostics flag.
pub const SLOT_COMM_DIAGNOSTICS: usize = 1;

/// Barrier message for the pre-main rendezvous, which bypasses the
/// coordinator gate.
pub const BARRIER_BEFORE_MAIN: &str = "barrier before main";
/// Barrier message used on the exit-all path; the coordinator skips it and
/// sequences shutdown itself.
pub const BARRIER_EXIT_ALL: &str = "exit all";
const BARRIER_FINALIZE: &str = "about to finalize";

/// A remote memory reference: a locale index plus an address registered in
/// that locale's address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteRef {
    pub locale: LocaleId,
    pub addr: u64,
}

/// Counts of remote operations issued by this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommCounters {
    pub puts: u32,
    pub gets: u32,
    pub forks: u32,
    pub nb_forks: u32,
}

struct Diagnostics {
    verbose: AtomicBool,
    enabled: AtomicBool,
    /// Suppresses counting while the diagnostic toggles themselves are
    /// being broadcast.
    no_debug_private: AtomicBool,
    counters: Mutex<CommCounters>,
}

struct Gate {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Gate {
        Gate {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn open(&self) {
        *self.flag.lock().expect("gate lock poisoned") = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut flag = self.flag.lock().expect("gate lock poisoned");
        while !*flag {
            flag = self.cv.wait(flag).expect("gate lock poisoned");
        }
    }

    fn is_open(&self) -> bool {
        *self.flag.lock().expect("gate lock poisoned")
    }
}

struct Shared {
    id: LocaleId,
    num_locales: usize,
    transport: Arc<dyn Transport>,
    tags: TagGen,
    mem: AddressSpace,
    fns: FnTable,
    private: PrivateTable,
    globals: GlobalsRegistry,
    diag: Diagnostics,
    /// 0 = wait for the coordinator's signal, 1 = full-group barrier,
    /// 2 = reduced-group barrier excluding the coordinator.
    okay_to_barrier: Mutex<u32>,
    start: Gate,
    finished: Gate,
}

/// One participant process of a distributed run. Owns the background
/// poller servicing inbound envelopes and exposes remote put/get/fork,
/// broadcast, barrier, and coordinated shutdown.
pub struct Locale {
    shared: Arc<Shared>,
    poller: Option<JoinHandle<()>>,
}

impl Locale {
    /// Join the coordination group, rendezvous with the peers, and start
    /// the poller (which idles until [`Locale::rollcall`]).
    pub fn init(transport: Arc<dyn Transport>) -> Locale {
        let id = transport.locale();
        let num_locales = transport.num_locales();
        let shared = Arc::new(Shared {
            id,
            num_locales,
            transport,
            tags: TagGen::default(),
            mem: AddressSpace::default(),
            fns: FnTable::default(),
            private: PrivateTable::default(),
            globals: GlobalsRegistry::default(),
            diag: Diagnostics {
                verbose: AtomicBool::new(false),
                enabled: AtomicBool::new(false),
                no_debug_private: AtomicBool::new(false),
                counters: Mutex::new(CommCounters::default()),
            },
            okay_to_barrier: Mutex::new(1),
            start: Gate::new(),
            finished: Gate::new(),
        });
        assert_eq!(shared.private.register(vec![0]), SLOT_VERBOSE_COMM);
        assert_eq!(shared.private.register(vec![0]), SLOT_COMM_DIAGNOSTICS);

        comm_check(shared.transport.barrier(num_locales), "init rendezvous");
        debug!(locale = id, num_locales, "joined coordination group");

        let poller_shared = shared.clone();
        let poller = std::thread::Builder::new()
            .name(format!("weft-poll-{id}"))
            .spawn(move || poll_loop(poller_shared))
            .expect("unable to start polling thread");
        Locale {
            shared,
            poller: Some(poller),
        }
    }

    /// Announce this locale and release the poller into its dispatch loop.
    /// From here on, barriers gate on the coordinator's signal.
    pub fn rollcall(&self) {
        debug!(
            locale = self.shared.id,
            num_locales = self.shared.num_locales,
            "executing rollcall"
        );
        if self.shared.num_locales != 1 {
            *self
                .shared
                .okay_to_barrier
                .lock()
                .expect("barrier flag lock poisoned") = 0;
        }
        self.shared.start.open();
    }

    pub fn id(&self) -> LocaleId {
        self.shared.id
    }

    pub fn num_locales(&self) -> usize {
        self.shared.num_locales
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.shared.mem
    }

    pub fn fn_table(&self) -> &FnTable {
        &self.shared.fns
    }

    pub fn globals(&self) -> &GlobalsRegistry {
        &self.shared.globals
    }

    pub fn private_table(&self) -> &PrivateTable {
        &self.shared.private
    }

    /// Store `bytes` at a (possibly remote) reference. Remote puts are one
    /// envelope plus one raw payload; the call blocks until the receiver's
    /// acknowledgment word arrives.
    pub fn put(&self, bytes: &[u8], dst: RemoteRef) {
        if dst.locale == self.shared.id {
            self.shared.mem.write(dst.addr, bytes);
            return;
        }
        self.shared.count(|c| c.puts += 1);
        let tag = self.shared.tags.mint(dst.locale);
        if self.verbose_comm() {
            debug!(
                from = self.shared.id,
                to = dst.locale,
                size = bytes.len(),
                tag,
                "remote put"
            );
        }
        let env = Envelope {
            kind: MsgKind::Put,
            reply_tag: tag,
            size: bytes.len() as u32,
            target: Target::Addr(dst.addr),
        };
        self.shared.send_envelope(dst.locale, env);
        self.shared.send_data(dst.locale, tag, bytes);
    }

    /// Fetch bytes from a (possibly remote) reference into `buf`.
    pub fn get(&self, buf: &mut [u8], src: RemoteRef) {
        if src.locale == self.shared.id {
            let data = self.shared.mem.read(src.addr, buf.len());
            buf.copy_from_slice(&data);
            return;
        }
        self.shared.count(|c| c.gets += 1);
        let tag = self.shared.tags.mint(src.locale);
        if self.verbose_comm() {
            debug!(
                from = src.locale,
                to = self.shared.id,
                size = buf.len(),
                tag,
                "remote get"
            );
        }
        let env = Envelope {
            kind: MsgKind::Get,
            reply_tag: tag,
            size: buf.len() as u32,
            target: Target::Addr(src.addr),
        };
        self.shared.send_envelope(src.locale, env);
        self.shared.recv_data(Some(src.locale), tag, buf);
    }

    /// Execute a registered function on `locale`, blocking until it
    /// completes there (the zero-length reply).
    pub fn fork(&self, locale: LocaleId, fid: FnId, arg: &[u8]) {
        if locale == self.shared.id {
            (self.shared.fns.get(fid))(arg);
            return;
        }
        self.shared.count(|c| c.forks += 1);
        let tag = self.shared.tags.mint(locale);
        if self.verbose_comm() {
            debug!(to = locale, fid, tag, "remote fork");
        }
        let env = Envelope {
            kind: MsgKind::Fork,
            reply_tag: tag,
            size: arg.len() as u32,
            target: Target::Fn(fid),
        };
        self.shared.send_envelope(locale, env);
        self.shared.send_data(locale, tag, arg);
        let mut empty = [0u8; 0];
        self.shared.recv_data(Some(locale), tag, &mut empty);
    }

    /// Fire-and-forget fork: the argument transfer is identical but no
    /// reply is ever sent; the remote task runs fully detached.
    pub fn fork_nb(&self, locale: LocaleId, fid: FnId, arg: &[u8]) {
        if locale == self.shared.id {
            let f = self.shared.fns.get(fid);
            let arg = arg.to_vec();
            rayon::spawn(move || f(&arg));
            return;
        }
        self.shared.count(|c| c.nb_forks += 1);
        let tag = self.shared.tags.mint(locale);
        if self.verbose_comm() {
            debug!(to = locale, fid, tag, "remote non-blocking fork");
        }
        let env = Envelope {
            kind: MsgKind::ForkNb,
            reply_tag: tag,
            size: arg.len() as u32,
            target: Target::Fn(fid),
        };
        self.shared.send_envelope(locale, env);
        self.shared.send_data(locale, tag, arg);
    }

    /// Replicate a private-table slot to every other locale.
    pub fn broadcast_private(&self, index: usize) {
        if self.shared.num_locales == 1 {
            return;
        }
        let tag = self.shared.tags.mint(self.shared.id);
        let bytes = self.shared.private.read(index);
        trace!(index, size = bytes.len(), tag, "broadcast private slot");
        let env = Envelope {
            kind: MsgKind::BroadcastPrivate,
            reply_tag: tag,
            size: bytes.len() as u32,
            target: Target::Fn(index as u32),
        };
        for dest in 0..self.shared.num_locales {
            if dest != self.shared.id {
                self.shared.send_envelope(dest, env);
                self.shared.send_data(dest, tag, &bytes);
            }
        }
    }

    /// Coordinator packs each registered global in registration order and
    /// issues one collective broadcast per global; everyone else unpacks
    /// into its local slots positionally.
    pub fn broadcast_globals(&self) {
        if self.shared.num_locales == 1 {
            return;
        }
        trace!(count = self.shared.globals.len(), "broadcast globals");
        for index in 0..self.shared.globals.len() {
            if self.shared.id == COORDINATOR {
                let bytes = self.shared.globals.read(index);
                comm_check(
                    self.shared.transport.broadcast(BCAST_TAG, &bytes),
                    "broadcast_globals",
                );
            } else {
                let mut buf = vec![0u8; self.shared.globals.read(index).len()];
                let r = comm_check(
                    self.shared.transport.recv(None, BCAST_TAG, &mut buf),
                    "broadcast_globals",
                );
                self.shared.globals.write(index, &buf[..r.len]);
            }
        }
    }

    /// Cluster-wide barrier. Non-coordinators block on the coordinator's
    /// okay-to-proceed flag before entering the collective barrier; a flag
    /// of 2 (exit-any) uses a reduced participant count that excludes the
    /// still-running coordinator.
    pub fn barrier(&self, msg: &str) {
        trace!(locale = self.shared.id, msg, "barrier");
        if msg == BARRIER_EXIT_ALL && self.shared.id == COORDINATOR {
            return;
        }
        if msg == BARRIER_BEFORE_MAIN {
            comm_check(
                self.shared.transport.barrier(self.shared.num_locales),
                "barrier",
            );
            return;
        }
        let mut flag = *self
            .shared
            .okay_to_barrier
            .lock()
            .expect("barrier flag lock poisoned");
        while flag == 0 {
            let mut buf = [0u8; 4];
            comm_check(
                self.shared.transport.recv(None, BCAST_TAG, &mut buf),
                "barrier gate",
            );
            flag = u32::from_le_bytes(buf);
            *self
                .shared
                .okay_to_barrier
                .lock()
                .expect("barrier flag lock poisoned") = flag;
        }
        let participants = if flag == 2 {
            self.shared.num_locales - 1
        } else {
            self.shared.num_locales
        };
        comm_check(self.shared.transport.barrier(participants), "barrier");
    }

    /// Coordinated shutdown; every locale must reach this exactly once,
    /// via `barrier(BARRIER_EXIT_ALL)` first (which the coordinator skips,
    /// holding the authority to release everyone else). The coordinator
    /// signals okay-to-barrier, matches the waiters' gate barrier, and then
    /// everyone finishes its own poller and rendezvouses once more before
    /// exit.
    pub fn exit_all(mut self) {
        debug!(locale = self.shared.id, "exit all");
        if self.shared.num_locales == 1 {
            *self
                .shared
                .okay_to_barrier
                .lock()
                .expect("barrier flag lock poisoned") = 1;
        } else if self.shared.id == COORDINATOR {
            *self
                .shared
                .okay_to_barrier
                .lock()
                .expect("barrier flag lock poisoned") = 1;
            comm_check(
                self.shared
                    .transport
                    .broadcast(BCAST_TAG, &1u32.to_le_bytes()),
                "exit_all",
            );
            comm_check(
                self.shared.transport.barrier(self.shared.num_locales),
                "exit_all",
            );
        }
        self.shared.finish_self();
        self.shared.finished.wait();
        self.barrier(BARRIER_FINALIZE);
        if let Some(poller) = self.poller.take() {
            poller.join().expect("poller panicked");
        }
    }

    /// Early termination triggered by any locale. A non-coordinator
    /// broadcasts flag 2 so the waiting locales barrier without the
    /// coordinator, and tells every poller (the coordinator's included) to
    /// stop; the coordinator path is identical to `exit_all`.
    pub fn exit_any(mut self) {
        debug!(locale = self.shared.id, "exit any");
        if self.shared.num_locales == 1 {
            *self
                .shared
                .okay_to_barrier
                .lock()
                .expect("barrier flag lock poisoned") = 1;
        } else if self.shared.id == COORDINATOR {
            *self
                .shared
                .okay_to_barrier
                .lock()
                .expect("barrier flag lock poisoned") = 1;
            comm_check(
                self.shared
                    .transport
                    .broadcast(BCAST_TAG, &1u32.to_le_bytes()),
                "exit_any",
            );
            comm_check(
                self.shared.transport.barrier(self.shared.num_locales),
                "exit_any",
            );
        } else {
            *self
                .shared
                .okay_to_barrier
                .lock()
                .expect("barrier flag lock poisoned") = 2;
            comm_check(
                self.shared
                    .transport
                    .broadcast(BCAST_TAG, &2u32.to_le_bytes()),
                "exit_any",
            );
            for dest in 0..self.shared.num_locales {
                if dest != self.shared.id {
                    self.shared.send_envelope(
                        dest,
                        Envelope {
                            kind: MsgKind::Finish,
                            reply_tag: 0,
                            size: 0,
                            target: Target::None,
                        },
                    );
                }
            }
        }
        self.shared.finish_self();
        self.shared.finished.wait();
        self.barrier(BARRIER_FINALIZE);
        if let Some(poller) = self.poller.take() {
            poller.join().expect("poller panicked");
        }
    }

    // ---- comm diagnostics ----

    pub fn start_verbose_comm(&self) {
        self.set_verbose(true, true);
    }

    pub fn stop_verbose_comm(&self) {
        self.set_verbose(false, true);
    }

    pub fn start_verbose_comm_here(&self) {
        self.set_verbose(true, false);
    }

    pub fn stop_verbose_comm_here(&self) {
        self.set_verbose(false, false);
    }

    fn set_verbose(&self, on: bool, everywhere: bool) {
        self.shared.diag.verbose.store(on, Ordering::SeqCst);
        self.shared
            .private
            .write(SLOT_VERBOSE_COMM, &[u8::from(on)]);
        if everywhere {
            self.shared.diag.no_debug_private.store(true, Ordering::SeqCst);
            self.broadcast_private(SLOT_VERBOSE_COMM);
            self.shared
                .diag
                .no_debug_private
                .store(false, Ordering::SeqCst);
        }
    }

    pub fn start_comm_diagnostics(&self) {
        self.set_diagnostics(true, true);
    }

    pub fn stop_comm_diagnostics(&self) {
        self.set_diagnostics(false, true);
    }

    pub fn start_comm_diagnostics_here(&self) {
        self.set_diagnostics(true, false);
    }

    pub fn stop_comm_diagnostics_here(&self) {
        self.set_diagnostics(false, false);
    }

    fn set_diagnostics(&self, on: bool, everywhere: bool) {
        self.shared.diag.enabled.store(on, Ordering::SeqCst);
        self.shared
            .private
            .write(SLOT_COMM_DIAGNOSTICS, &[u8::from(on)]);
        if everywhere {
            self.shared.diag.no_debug_private.store(true, Ordering::SeqCst);
            self.broadcast_private(SLOT_COMM_DIAGNOSTICS);
            self.shared
                .diag
                .no_debug_private
                .store(false, Ordering::SeqCst);
        }
    }

    pub fn verbose_comm(&self) -> bool {
        self.shared.diag.verbose.load(Ordering::SeqCst)
    }

    pub fn comm_counters(&self) -> CommCounters {
        *self
            .shared
            .diag
            .counters
            .lock()
            .expect("diagnostics lock poisoned")
    }

    pub fn num_puts(&self) -> u32 {
        self.comm_counters().puts
    }

    pub fn num_gets(&self) -> u32 {
        self.comm_counters().gets
    }

    pub fn num_forks(&self) -> u32 {
        self.comm_counters().forks
    }

    pub fn num_nb_forks(&self) -> u32 {
        self.comm_counters().nb_forks
    }

    /// Whether this locale's poller has observed a Finish envelope and
    /// exited its dispatch loop.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.is_open()
    }
}

impl Drop for Locale {
    fn drop(&mut self) {
        // Join only a poller that has already been told to finish; an
        // abandoned locale must not hang its owner.
        if let Some(poller) = self.poller.take() {
            if self.shared.finished.is_open() {
                let _ = poller.join();
            }
        }
    }
}

impl Shared {
    fn send_envelope(&self, dest: LocaleId, env: Envelope) {
        comm_check(
            self.transport.send(dest, ENVELOPE_TAG, &env.to_bytes()),
            "send envelope",
        );
    }

    /// Data-plane send: blocks until the receiver's one-word
    /// acknowledgment comes back on the same tag.
    fn send_data(&self, dest: LocaleId, tag: Tag, bytes: &[u8]) {
        comm_check(self.transport.send(dest, tag, bytes), "send data");
        let mut ack = [0u8; 4];
        comm_check(self.transport.recv(Some(dest), tag, &mut ack), "recv ack");
    }

    /// Data-plane receive: acknowledges with a single word so the sender
    /// may proceed.
    fn recv_data(&self, src: Option<LocaleId>, tag: Tag, buf: &mut [u8]) -> LocaleId {
        let r = comm_check(self.transport.recv(src, tag, buf), "recv data");
        comm_check(
            self.transport.send(r.source, tag, &0u32.to_le_bytes()),
            "send ack",
        );
        r.source
    }

    fn count(&self, bump: impl FnOnce(&mut CommCounters)) {
        if self.diag.enabled.load(Ordering::SeqCst)
            && !self.diag.no_debug_private.load(Ordering::SeqCst)
        {
            let mut counters = self.diag.counters.lock().expect("diagnostics lock poisoned");
            bump(&mut counters);
        }
    }

    fn finish_self(&self) {
        let env = Envelope {
            kind: MsgKind::Finish,
            reply_tag: 0,
            size: 0,
            target: Target::None,
        };
        self.send_envelope(self.id, env);
    }

    fn apply_private_slot(&self, index: usize, bytes: &[u8]) {
        let on = bytes.first().copied().unwrap_or(0) != 0;
        match index {
            SLOT_VERBOSE_COMM => self.diag.verbose.store(on, Ordering::SeqCst),
            SLOT_COMM_DIAGNOSTICS => self.diag.enabled.store(on, Ordering::SeqCst),
            _ => {}
        }
    }
}

/// Background dispatch loop: one envelope at a time, routed by operation
/// kind, until a Finish envelope releases the termination latch.
fn poll_loop(shared: Arc<Shared>) {
    trace!(locale = shared.id, "poller waiting for rollcall");
    shared.start.wait();
    trace!(locale = shared.id, "poller running");
    loop {
        let mut env_buf = [0u8; Envelope::WIRE_LEN];
        let r = comm_check(
            shared.transport.recv(None, ENVELOPE_TAG, &mut env_buf),
            "poller recv",
        );
        let env = Envelope::from_bytes(&env_buf[..r.len])
            .unwrap_or_else(|e| panic!("fatal comm error in poller: {e}"));
        let source = r.source;
        trace!(locale = shared.id, ?env, source, "poller dispatch");
        match env.kind {
            MsgKind::Put => {
                // Land the bytes at the advertised address before the
                // acknowledgment is sent, so a completed put is visible.
                let mut data = vec![0u8; env.size as usize];
                let r = comm_check(
                    shared
                        .transport
                        .recv(Some(source), env.reply_tag, &mut data),
                    "recv data",
                );
                shared.mem.write(env.target.addr(), &data);
                comm_check(
                    shared
                        .transport
                        .send(r.source, env.reply_tag, &0u32.to_le_bytes()),
                    "send ack",
                );
            }
            MsgKind::Get => {
                let data = shared.mem.read(env.target.addr(), env.size as usize);
                shared.send_data(source, env.reply_tag, &data);
            }
            MsgKind::Fork => {
                let mut arg = vec![0u8; env.size as usize];
                shared.recv_data(Some(source), env.reply_tag, &mut arg);
                let f = shared.fns.get(env.target.fn_id());
                let reply_tag = env.reply_tag;
                let shared = shared.clone();
                rayon::spawn(move || {
                    f(&arg);
                    shared.send_data(source, reply_tag, &[]);
                });
            }
            MsgKind::ForkNb => {
                let mut arg = vec![0u8; env.size as usize];
                shared.recv_data(Some(source), env.reply_tag, &mut arg);
                let f = shared.fns.get(env.target.fn_id());
                rayon::spawn(move || f(&arg));
            }
            MsgKind::BroadcastPrivate => {
                let mut data = vec![0u8; env.size as usize];
                let r = comm_check(
                    shared
                        .transport
                        .recv(Some(source), env.reply_tag, &mut data),
                    "recv data",
                );
                let index = env.target.fn_id() as usize;
                shared.private.write(index, &data);
                shared.apply_private_slot(index, &data);
                comm_check(
                    shared
                        .transport
                        .send(r.source, env.reply_tag, &0u32.to_le_bytes()),
                    "send ack",
                );
            }
            MsgKind::Finish => {
                trace!(locale = shared.id, "poller finishing");
                shared.finished.open();
                break;
            }
        }
    }
}
