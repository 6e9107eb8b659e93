use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use weft_comm::{
    Envelope, Locale, LocaleId, MemHub, MsgKind, Recv, RemoteRef, Tag, Transport, TransportError,
    BARRIER_BEFORE_MAIN, BARRIER_EXIT_ALL, ENVELOPE_TAG,
};

/// Runs one scenario closure per locale, each on its own thread against a
/// shared in-process hub.
fn run_locales<F>(n: usize, scenario: F)
where
    F: Fn(Locale) + Send + Sync + 'static,
{
    let hub = MemHub::new(n);
    let scenario = Arc::new(scenario);
    let mut handles = Vec::new();
    for id in 0..n {
        let transport = Arc::new(hub.endpoint(id));
        let scenario = scenario.clone();
        handles.push(
            thread::Builder::new()
                .name(format!("locale-{id}"))
                .spawn(move || {
                    let locale = Locale::init(transport);
                    locale.rollcall();
                    scenario(locale);
                })
                .expect("spawn locale"),
        );
    }
    for h in handles {
        h.join().expect("locale thread panicked");
    }
}

fn shut_down(locale: Locale) {
    locale.barrier(BARRIER_EXIT_ALL);
    locale.exit_all();
}

#[test]
fn put_lands_remotely_and_blocks_until_acknowledged() {
    run_locales(2, |locale| {
        if locale.id() == 1 {
            locale.address_space().register(0x40, 64);
        }
        locale.barrier(BARRIER_BEFORE_MAIN);

        if locale.id() == 0 {
            let payload = [7u8; 64];
            locale.put(
                &payload,
                RemoteRef {
                    locale: 1,
                    addr: 0x40,
                },
            );
        }
        locale.barrier(BARRIER_BEFORE_MAIN);

        if locale.id() == 1 {
            // The initiator passed its barrier only after the ack, and the
            // ack is sent after the bytes land.
            assert_eq!(locale.address_space().read(0x40, 64), vec![7u8; 64]);
        }
        shut_down(locale);
    });
}

#[test]
fn get_pulls_remote_bytes() {
    run_locales(2, |locale| {
        if locale.id() == 1 {
            locale.address_space().register(0x10, 8);
            locale.address_space().write(0x10, &[1, 2, 3, 4, 5, 6, 7, 8]);
        }
        locale.barrier(BARRIER_BEFORE_MAIN);

        if locale.id() == 0 {
            let mut buf = [0u8; 8];
            locale.get(
                &mut buf,
                RemoteRef {
                    locale: 1,
                    addr: 0x10,
                },
            );
            assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
        }
        locale.barrier(BARRIER_BEFORE_MAIN);
        shut_down(locale);
    });
}

#[test]
fn fork_is_synchronous_from_the_caller() {
    let hits: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    let hits_for_scenario = hits.clone();
    run_locales(2, move |locale| {
        let hits = hits_for_scenario.clone();
        let fid = locale.fn_table().register(move |arg| {
            // Deliberately slow so a non-blocking caller would race ahead.
            thread::sleep(Duration::from_millis(50));
            hits.fetch_add(u32::from(arg[0]), Ordering::SeqCst);
        });
        locale.barrier(BARRIER_BEFORE_MAIN);

        if locale.id() == 0 {
            locale.fork(1, fid, &[5]);
            assert_eq!(
                hits_for_scenario.load(Ordering::SeqCst),
                5,
                "fork returns only after the remote function completed"
            );
        }
        locale.barrier(BARRIER_BEFORE_MAIN);
        shut_down(locale);
    });
}

#[test]
fn fork_nb_runs_detached() {
    let done: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    let done_for_scenario = done.clone();
    run_locales(2, move |locale| {
        let done = done_for_scenario.clone();
        let fid = locale
            .fn_table()
            .register(move |_arg| {
                done.fetch_add(1, Ordering::SeqCst);
            });
        locale.barrier(BARRIER_BEFORE_MAIN);

        if locale.id() == 0 {
            locale.fork_nb(1, fid, &[]);
        }
        // The launch is fire-and-forget; wait for the side effect before
        // tearing the group down.
        if locale.id() == 1 {
            let mut spins = 0;
            while done_for_scenario.load(Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(5));
                spins += 1;
                assert!(spins < 1000, "non-blocking fork never ran");
            }
        }
        locale.barrier(BARRIER_BEFORE_MAIN);
        shut_down(locale);
    });
}

#[test]
fn broadcast_globals_lands_positionally_on_every_locale() {
    run_locales(3, |locale| {
        // Same registration order everywhere; only the coordinator's
        // values survive the broadcast.
        let fill = if locale.id() == 0 { [10, 20, 30] } else { [0, 0, 0] };
        for v in fill {
            locale.globals().register(vec![v, v]);
        }
        locale.barrier(BARRIER_BEFORE_MAIN);

        locale.broadcast_globals();
        locale.barrier(BARRIER_BEFORE_MAIN);

        for (slot, v) in [10u8, 20, 30].into_iter().enumerate() {
            assert_eq!(
                locale.globals().read(slot),
                vec![v, v],
                "slot {slot} demultiplexes by position"
            );
        }
        shut_down(locale);
    });
}

#[test]
fn diagnostics_counters_track_issued_operations() {
    run_locales(2, |locale| {
        locale.address_space().register(0x99, 16);
        let fid = locale.fn_table().register(|_| {});
        locale.barrier(BARRIER_BEFORE_MAIN);

        if locale.id() == 0 {
            locale.start_comm_diagnostics_here();
            let dst = RemoteRef {
                locale: 1,
                addr: 0x99,
            };
            locale.put(&[1u8; 16], dst);
            locale.put(&[2u8; 16], dst);
            let mut buf = [0u8; 16];
            locale.get(&mut buf, dst);
            locale.fork(1, fid, &[]);

            let counters = locale.comm_counters();
            assert_eq!(counters.puts, 2);
            assert_eq!(counters.gets, 1);
            assert_eq!(counters.forks, 1);
            assert_eq!(counters.nb_forks, 0);

            // Local fast paths are not remote operations.
            locale.address_space().register(0x99, 16);
            locale.put(
                &[3u8; 16],
                RemoteRef {
                    locale: 0,
                    addr: 0x99,
                },
            );
            assert_eq!(locale.comm_counters().puts, 2);
        }
        locale.barrier(BARRIER_BEFORE_MAIN);
        shut_down(locale);
    });
}

#[test]
fn broadcast_private_replicates_toggles() {
    run_locales(2, |locale| {
        locale.barrier(BARRIER_BEFORE_MAIN);
        if locale.id() == 0 {
            locale.start_verbose_comm();
        }
        locale.barrier(BARRIER_BEFORE_MAIN);
        // Give the peer's poller a moment to apply the slot.
        let mut spins = 0;
        while !locale.verbose_comm() {
            thread::sleep(Duration::from_millis(5));
            spins += 1;
            assert!(spins < 1000, "verbose toggle never arrived");
        }
        shut_down(locale);
    });
}

#[test]
fn exit_any_excludes_the_coordinator_from_the_final_barrier() {
    let coordinator_done = Arc::new(AtomicU32::new(0));
    let flag = coordinator_done.clone();
    run_locales(3, move |locale| {
        match locale.id() {
            0 => {
                // The coordinator keeps running independently; its poller
                // must still be told to stop.
                let mut spins = 0;
                while !locale.is_finished() {
                    thread::sleep(Duration::from_millis(5));
                    spins += 1;
                    assert!(spins < 1000, "coordinator poller never finished");
                }
                flag.fetch_add(1, Ordering::SeqCst);
            }
            1 => {
                // Abnormal termination from a non-coordinator.
                thread::sleep(Duration::from_millis(20));
                locale.exit_any();
            }
            _ => {
                // Waiting peer: released by the reduced-count barrier.
                locale.barrier("waiting for peers");
            }
        }
    });
    assert_eq!(coordinator_done.load(Ordering::SeqCst), 1);
}

/// Transport decorator recording every send, used to observe wire framing.
struct Recording<T: Transport> {
    inner: T,
    log: Arc<Mutex<Vec<(LocaleId, Tag, Vec<u8>)>>>,
}

impl<T: Transport> Transport for Recording<T> {
    fn locale(&self) -> LocaleId {
        self.inner.locale()
    }

    fn num_locales(&self) -> usize {
        self.inner.num_locales()
    }

    fn send(&self, dest: LocaleId, tag: Tag, bytes: &[u8]) -> Result<(), TransportError> {
        self.log
            .lock()
            .expect("log lock")
            .push((dest, tag, bytes.to_vec()));
        self.inner.send(dest, tag, bytes)
    }

    fn recv(
        &self,
        src: Option<LocaleId>,
        tag: Tag,
        buf: &mut [u8],
    ) -> Result<Recv, TransportError> {
        self.inner.recv(src, tag, buf)
    }

    fn broadcast(&self, tag: Tag, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.broadcast(tag, bytes)
    }

    fn barrier(&self, participants: usize) -> Result<(), TransportError> {
        self.inner.barrier(participants)
    }
}

#[test]
fn put_frames_exactly_one_envelope_then_one_payload() {
    let hub = MemHub::new(2);
    let log = Arc::new(Mutex::new(Vec::new()));

    let initiator_log = log.clone();
    let initiator_hub = hub.clone();
    let initiator = thread::spawn(move || {
        let transport = Arc::new(Recording {
            inner: initiator_hub.endpoint(0),
            log: initiator_log,
        });
        let locale = Locale::init(transport);
        locale.rollcall();
        locale.barrier(BARRIER_BEFORE_MAIN);
        locale.put(
            &[9u8; 64],
            RemoteRef {
                locale: 1,
                addr: 0x40,
            },
        );
        locale.barrier(BARRIER_BEFORE_MAIN);
        locale.barrier(BARRIER_EXIT_ALL);
        locale.exit_all();
    });
    let target = thread::spawn(move || {
        let transport = Arc::new(hub.endpoint(1));
        let locale = Locale::init(transport);
        locale.rollcall();
        locale.address_space().register(0x40, 64);
        locale.barrier(BARRIER_BEFORE_MAIN);
        locale.barrier(BARRIER_BEFORE_MAIN);
        locale.barrier(BARRIER_EXIT_ALL);
        locale.exit_all();
    });
    initiator.join().expect("initiator");
    target.join().expect("target");

    let log = log.lock().expect("log lock");
    // The Finish at exit goes to the locale itself; everything sent to the
    // peer belongs to the put.
    let to_peer: Vec<_> = log.iter().filter(|(dest, _, _)| *dest == 1).collect();
    assert_eq!(to_peer.len(), 2, "one envelope and one payload, nothing else");

    let (_, env_tag, env_bytes) = to_peer[0];
    assert_eq!(*env_tag, ENVELOPE_TAG, "the envelope comes first");
    assert_eq!(env_bytes.len(), Envelope::WIRE_LEN);
    let env = Envelope::from_bytes(env_bytes).expect("decode envelope");
    assert_eq!(env.kind, MsgKind::Put);
    assert_eq!(env.size, 64);

    let (_, payload_tag, payload_bytes) = to_peer[1];
    assert_eq!(*payload_tag, env.reply_tag, "payload rides the minted reply tag");
    assert_eq!(payload_bytes.len(), 64);
}
