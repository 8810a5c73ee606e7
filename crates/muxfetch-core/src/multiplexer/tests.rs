use super::*;
use crate::response::{FetchError, Response};
use crate::transport::TransportHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use std::thread;

const TILE: &str = "res://tileset/12/34/56";

/// Transport that records starts and aborts; tests complete operations by hand.
#[derive(Default)]
struct MockTransport {
    next_id: AtomicU64,
    started: Mutex<Vec<(TransportHandle, String, Option<Completer>)>>,
    aborted: Mutex<Vec<TransportHandle>>,
    /// `(op id, key, generation)` as seen on each completer at start.
    tokens: Mutex<Vec<(u64, String, u64)>>,
    on_start: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MockTransport {
    fn start_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    fn handles(&self) -> Vec<TransportHandle> {
        self.started.lock().unwrap().iter().map(|(h, ..)| *h).collect()
    }

    fn aborted(&self) -> Vec<TransportHandle> {
        self.aborted.lock().unwrap().clone()
    }

    fn tokens(&self) -> Vec<(u64, String, u64)> {
        self.tokens.lock().unwrap().clone()
    }

    /// Deliver a completion for `handle`, even if it was aborted.
    fn complete(&self, handle: TransportHandle, result: FetchResult) {
        let completer = {
            let mut started = self.started.lock().unwrap();
            let slot = started
                .iter_mut()
                .find(|(h, ..)| *h == handle)
                .expect("unknown handle");
            slot.2.take().expect("already completed")
        };
        completer.complete(result);
    }

    fn set_on_start(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_start.lock().unwrap() = Some(Box::new(hook));
    }
}

impl Transport for MockTransport {
    fn start(&self, resource: &Resource, completer: Completer) -> TransportHandle {
        let hook = self.on_start.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let handle = TransportHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.tokens.lock().unwrap().push((
            handle.id(),
            completer.key().as_str().to_string(),
            completer.generation().get(),
        ));
        self.started
            .lock()
            .unwrap()
            .push((handle, resource.url.clone(), Some(completer)));
        handle
    }

    fn abort(&self, handle: TransportHandle) {
        self.aborted.lock().unwrap().push(handle);
    }
}

/// Transport that completes synchronously from inside `start`.
#[derive(Default)]
struct ImmediateTransport {
    aborted: AtomicU64,
}

impl Transport for ImmediateTransport {
    fn start(&self, resource: &Resource, completer: Completer) -> TransportHandle {
        completer.complete(Ok(Response::ok(resource.url.as_bytes().to_vec())));
        TransportHandle::new(1)
    }

    fn abort(&self, _handle: TransportHandle) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }
}

type Inbox = Arc<Mutex<Vec<FetchResult>>>;

fn inbox() -> Inbox {
    Arc::new(Mutex::new(Vec::new()))
}

fn sink(inbox: &Inbox) -> impl FnOnce(FetchResult) + Send + 'static {
    let inbox = Arc::clone(inbox);
    move |r| inbox.lock().unwrap().push(r)
}

fn setup() -> (Arc<MockTransport>, RequestMultiplexer) {
    let transport = Arc::new(MockTransport::default());
    let mux = RequestMultiplexer::new(transport.clone());
    (transport, mux)
}

#[test]
fn concurrent_requests_share_one_transport() {
    let (transport, mux) = setup();
    let (a, b) = (inbox(), inbox());

    let _ha = mux.request(&Resource::tile(TILE), sink(&a));
    let _hb = mux.request(&Resource::tile(TILE), sink(&b));
    assert_eq!(transport.start_count(), 1);
    assert_eq!(mux.subscriber_count(&Resource::tile(TILE)), 2);

    let op = transport.handles()[0];
    transport.complete(op, Ok(Response::ok(b"payload".to_vec())));

    let a = a.lock().unwrap();
    let b = b.lock().unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    let (ra, rb) = (a[0].as_ref().unwrap(), b[0].as_ref().unwrap());
    assert_eq!(ra, rb);
    assert!(Arc::ptr_eq(&ra.data, &rb.data), "fan-out shares one payload");

    let stats = mux.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(stats.transports_started, 1);
    assert_eq!(stats.completions, 1);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn different_keys_start_separate_transports() {
    let (transport, mux) = setup();
    let _a = mux.request(&Resource::new("https://example.com/a"), |_| {});
    let _b = mux.request(&Resource::new("https://example.com/b"), |_| {});
    assert_eq!(transport.start_count(), 2);
    assert_eq!(mux.stats().in_flight, 2);
}

#[test]
fn cancelling_one_subscriber_leaves_the_other() {
    let (transport, mux) = setup();
    let (a, b) = (inbox(), inbox());

    let ha = mux.request(&Resource::tile(TILE), sink(&a));
    let _hb = mux.request(&Resource::tile(TILE), sink(&b));
    mux.cancel(&ha);

    assert!(transport.aborted().is_empty());
    assert_eq!(mux.subscriber_count(&Resource::tile(TILE)), 1);

    transport.complete(transport.handles()[0], Ok(Response::ok(b"p".to_vec())));
    assert!(a.lock().unwrap().is_empty());
    assert_eq!(b.lock().unwrap().len(), 1);
}

#[test]
fn last_cancel_aborts_and_rerequest_starts_fresh() {
    let (transport, mux) = setup();
    let first = mux.request(&Resource::tile(TILE), |_| {});
    let old = transport.handles()[0];

    first.cancel();
    assert_eq!(transport.aborted(), vec![old]);
    assert_eq!(mux.stats().in_flight, 0);

    let _again = mux.request(&Resource::tile(TILE), |_| {});
    assert_eq!(transport.start_count(), 2);
    assert_ne!(transport.handles()[1], old);
    assert_eq!(transport.aborted().len(), 1);

    let tokens = transport.tokens();
    assert_eq!(tokens[0].0, old.id());
    assert!(tokens.iter().all(|(_, key, _)| key == TILE));
    assert!(tokens[1].2 > tokens[0].2, "re-request gets a newer generation");
}

#[test]
fn stale_completion_is_discarded() {
    let (transport, mux) = setup();
    let (stale, fresh) = (inbox(), inbox());

    let h = mux.request(&Resource::tile(TILE), sink(&stale));
    let old = transport.handles()[0];
    h.cancel();
    let _h2 = mux.request(&Resource::tile(TILE), sink(&fresh));
    let new = transport.handles()[1];

    // The aborted operation still reports in.
    transport.complete(old, Ok(Response::ok(b"old".to_vec())));
    assert!(stale.lock().unwrap().is_empty());
    assert!(fresh.lock().unwrap().is_empty());
    assert_eq!(mux.subscriber_count(&Resource::tile(TILE)), 1);
    assert_eq!(mux.stats().stale_completions, 1);

    transport.complete(new, Ok(Response::ok(b"new".to_vec())));
    let fresh = fresh.lock().unwrap();
    assert_eq!(&*fresh[0].as_ref().unwrap().data, b"new");
}

#[test]
fn completion_for_unknown_key_is_discarded() {
    let (transport, mux) = setup();
    let h = mux.request(&Resource::new("https://example.com/a"), |_| {});
    let op = transport.handles()[0];
    drop(h);
    transport.complete(op, Err(FetchError::NotFound));
    assert_eq!(mux.stats().stale_completions, 1);
    assert_eq!(mux.stats().completions, 0);
}

#[test]
fn rerequest_from_inside_callback_starts_a_new_transport() {
    let (transport, mux) = setup();
    let mux = Arc::new(mux);
    let rejoined: Arc<Mutex<Option<RequestHandle>>> = Arc::new(Mutex::new(None));

    let _h = {
        let mux2 = Arc::clone(&mux);
        let rejoined = Arc::clone(&rejoined);
        mux.request(&Resource::tile(TILE), move |_| {
            let handle = mux2.request(&Resource::tile(TILE), |_| {});
            *rejoined.lock().unwrap() = Some(handle);
        })
    };

    transport.complete(transport.handles()[0], Ok(Response::ok(b"p".to_vec())));

    assert_eq!(transport.start_count(), 2);
    assert!(rejoined.lock().unwrap().is_some());
    assert_eq!(mux.subscriber_count(&Resource::tile(TILE)), 1);
    assert_ne!(transport.handles()[0], transport.handles()[1]);
}

#[test]
fn cancel_from_inside_callback_does_not_deadlock() {
    let (transport, mux) = setup();
    let mux = Arc::new(mux);
    let other = Arc::new(Mutex::new(Some(
        mux.request(&Resource::new("https://example.com/other"), |_| {}),
    )));

    let _h = {
        let other = Arc::clone(&other);
        mux.request(&Resource::tile(TILE), move |_| {
            if let Some(h) = other.lock().unwrap().take() {
                h.cancel();
            }
        })
    };
    let tile_op = transport.handles()[1];
    transport.complete(tile_op, Ok(Response::ok(Vec::new())));

    assert_eq!(transport.aborted(), vec![transport.handles()[0]]);
    assert_eq!(mux.stats().in_flight, 0);
}

#[test]
fn cancel_is_idempotent() {
    let (transport, mux) = setup();
    let calls = inbox();

    let h = mux.request(&Resource::tile(TILE), sink(&calls));
    h.cancel();
    h.cancel();
    mux.cancel(&h);
    assert_eq!(transport.aborted().len(), 1);
    assert_eq!(mux.stats().cancellations, 1);

    let done = mux.request(&Resource::new("https://example.com/done"), sink(&calls));
    transport.complete(transport.handles()[1], Ok(Response::ok(b"d".to_vec())));
    done.cancel();
    done.cancel();
    assert_eq!(transport.aborted().len(), 1);
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[test]
fn dropping_a_handle_cancels_but_detach_does_not() {
    let (transport, mux) = setup();
    let (dropped, detached) = (inbox(), inbox());

    drop(mux.request(&Resource::new("https://example.com/a"), sink(&dropped)));
    assert_eq!(transport.aborted().len(), 1);

    mux.request(&Resource::new("https://example.com/b"), sink(&detached))
        .detach();
    assert_eq!(mux.stats().in_flight, 1);
    transport.complete(transport.handles()[1], Ok(Response::ok(b"b".to_vec())));

    assert!(dropped.lock().unwrap().is_empty());
    assert_eq!(detached.lock().unwrap().len(), 1);
}

#[test]
fn transport_error_fans_out_to_every_subscriber() {
    let (transport, mux) = setup();
    let (a, b) = (inbox(), inbox());
    let _ha = mux.request(&Resource::tile(TILE), sink(&a));
    let _hb = mux.request(&Resource::tile(TILE), sink(&b));

    transport.complete(transport.handles()[0], Err(FetchError::Server(503)));
    assert_eq!(a.lock().unwrap()[0], Err(FetchError::Server(503)));
    assert_eq!(b.lock().unwrap()[0], Err(FetchError::Server(503)));
}

#[test]
fn subscribers_are_notified_in_registration_order() {
    let (transport, mux) = setup();
    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<RequestHandle> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            mux.request(&Resource::tile(TILE), move |_| order.lock().unwrap().push(i))
        })
        .collect();
    transport.complete(transport.handles()[0], Ok(Response::ok(Vec::new())));
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    drop(handles);
    assert!(transport.aborted().is_empty());
}

#[test]
fn synchronous_completion_inside_start() {
    let transport = Arc::new(ImmediateTransport::default());
    let mux = RequestMultiplexer::new(transport.clone());
    let got = inbox();

    let _h = mux.request(&Resource::new("https://example.com/now"), sink(&got));
    assert_eq!(got.lock().unwrap().len(), 1);
    assert_eq!(mux.stats().in_flight, 0);
    assert_eq!(transport.aborted.load(Ordering::Relaxed), 0);
}

#[test]
fn shutdown_while_starting_aborts_the_orphaned_operation() {
    let (transport, mux) = setup();
    let mux = Arc::new(mux);
    let got = inbox();
    {
        let mux = Arc::clone(&mux);
        transport.set_on_start(move || mux.shutdown());
    }

    let _h = mux.request(&Resource::tile(TILE), sink(&got));
    let op = transport.handles()[0];
    assert_eq!(transport.aborted(), vec![op]);

    transport.complete(op, Ok(Response::ok(Vec::new())));
    assert!(got.lock().unwrap().is_empty());
}

#[test]
fn shutdown_aborts_in_flight_and_drops_callbacks() {
    let (transport, mux) = setup();
    let got = inbox();
    let _a = mux.request(&Resource::new("https://example.com/a"), sink(&got));
    let _b = mux.request(&Resource::new("https://example.com/b"), sink(&got));

    mux.shutdown();
    let mut aborted = transport.aborted();
    aborted.sort();
    assert_eq!(aborted, transport.handles());
    assert_eq!(mux.stats().in_flight, 0);

    let _late = mux.request(&Resource::new("https://example.com/c"), sink(&got));
    assert_eq!(transport.start_count(), 2);
    for op in transport.handles() {
        transport.complete(op, Ok(Response::ok(Vec::new())));
    }
    assert!(got.lock().unwrap().is_empty());
}

#[test]
fn tileset_scenario_across_threads() {
    let (transport, mux) = setup();
    let mux = Arc::new(mux);
    let (h1_inbox, h2_inbox) = (inbox(), inbox());

    let h1 = {
        let mux = Arc::clone(&mux);
        let cb = sink(&h1_inbox);
        thread::spawn(move || mux.request(&Resource::tile(TILE), cb))
            .join()
            .unwrap()
    };
    {
        let mux = Arc::clone(&mux);
        let cb = sink(&h2_inbox);
        thread::spawn(move || {
            let h2 = mux.request(&Resource::tile(TILE), cb);
            mux.cancel(&h2);
        })
        .join()
        .unwrap();
    }
    assert_eq!(transport.start_count(), 1);
    let t = transport.handles()[0];

    {
        let transport = Arc::clone(&transport);
        thread::spawn(move || transport.complete(t, Ok(Response::ok(b"P".to_vec()))))
            .join()
            .unwrap();
    }
    assert!(h2_inbox.lock().unwrap().is_empty());
    let h1_got = h1_inbox.lock().unwrap();
    assert_eq!(h1_got.len(), 1);
    assert_eq!(&*h1_got[0].as_ref().unwrap().data, b"P");
    drop(h1_got);
    drop(h1);

    let _later = mux.request(&Resource::tile(TILE), |_| {});
    assert_eq!(transport.start_count(), 2);
    assert_ne!(transport.handles()[1], t);
}

#[test]
fn racing_requests_never_start_twice() {
    let (transport, mux) = setup();
    let mux = Arc::new(mux);
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let mux = Arc::clone(&mux);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..50)
                    .map(|_| mux.request(&Resource::tile(TILE), |_| {}))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let handles: Vec<RequestHandle> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();

    assert_eq!(transport.start_count(), 1);
    assert_eq!(mux.subscriber_count(&Resource::tile(TILE)), 400);

    drop(handles);
    assert_eq!(transport.aborted().len(), 1);
    assert_eq!(mux.stats().in_flight, 0);
}

#[test]
fn racing_cancel_and_request_resolve_cleanly() {
    let (transport, mux) = setup();
    let mux = Arc::new(mux);

    for _ in 0..100 {
        let first = mux.request(&Resource::tile(TILE), |_| {});
        let barrier = Arc::new(Barrier::new(2));
        let canceller = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                first.cancel();
            })
        };
        let joiner = {
            let mux = Arc::clone(&mux);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                mux.request(&Resource::tile(TILE), |_| {})
            })
        };
        canceller.join().unwrap();
        let second = joiner.join().unwrap();

        // Whichever way the race went, the survivor is registered on a live entry.
        assert_eq!(mux.subscriber_count(&Resource::tile(TILE)), 1);
        drop(second);
        assert_eq!(mux.stats().in_flight, 0);
    }

    let stats = mux.stats();
    assert_eq!(stats.transports_started as usize, transport.start_count());
    assert_eq!(stats.aborts as usize, transport.aborted().len());
    assert_eq!(stats.transports_started, stats.aborts);
}

#[tokio::test]
async fn fetch_resolves_through_oneshot() {
    let (transport, mux) = setup();
    let (_h1, rx1) = mux.fetch(&Resource::tile(TILE));
    let (_h2, rx2) = mux.fetch(&Resource::tile(TILE));
    let op = transport.handles()[0];

    let completer = Arc::clone(&transport);
    std::thread::spawn(move || completer.complete(op, Ok(Response::ok(b"tile".to_vec()))));

    let r1 = rx1.await.unwrap().unwrap();
    let r2 = rx2.await.unwrap().unwrap();
    assert_eq!(&*r1.data, b"tile");
    assert!(Arc::ptr_eq(&r1.data, &r2.data));
}

#[tokio::test]
async fn fetch_receiver_errors_when_cancelled() {
    let (_transport, mux) = setup();
    let (h, rx) = mux.fetch(&Resource::tile(TILE));
    h.cancel();
    assert!(rx.await.is_err());
}
