//! End-to-end tests of sessions over the loopback network.
//!
//! Completions are produced on the loopback I/O threads and must only reach
//! host callbacks through `poll` on the test thread.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=kvpoll=debug cargo test --features tracing --test loopback_sessions -- --nocapture
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Once;
use std::thread;
use std::time::Duration;

use minstant::Instant;

use kvpoll::{
    Callback, Client, ConnectOptions, Event, Hook, HostValue, LoopbackServer, NetworkError,
    NetworkSession, Session, SessionError, SessionState, Subscriber,
};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        kvpoll::init_tracing();
    });
}

const DEADLINE: Duration = Duration::from_secs(5);

/// Polls `session` until `done` holds or the deadline passes.
fn poll_until<N: NetworkSession, E: Event>(
    session: &mut Session<N, E>,
    mut done: impl FnMut(&Session<N, E>) -> bool,
) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        session.poll().expect("session open");
        if done(session) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

type Calls = Rc<RefCell<Vec<Vec<HostValue>>>>;

fn record(calls: &Calls) -> Callback {
    let calls = Rc::clone(calls);
    Callback::infallible(move |args| calls.borrow_mut().push(args.to_vec()))
}

fn counter(count: &Rc<Cell<u32>>) -> Callback {
    let count = Rc::clone(count);
    Callback::infallible(move |_| count.set(count.get() + 1))
}

fn connected_client(server: &LoopbackServer) -> Client<kvpoll::LoopbackClient> {
    init_test_tracing();
    let mut client = Client::new(server.client());
    client.connect(ConnectOptions::default()).unwrap();
    assert!(poll_until(&mut client, |c| c.state() == SessionState::Connected));
    client
}

#[test]
fn test_set_then_poll_delivers_ok_once() {
    let server = LoopbackServer::new();
    let mut client = connected_client(&server);
    let calls = Calls::default();

    client.set("k", "v", Some(record(&calls))).unwrap();
    client.commit().unwrap();
    assert!(poll_until(&mut client, |_| !calls.borrow().is_empty()));

    assert_eq!(*calls.borrow(), vec![vec![HostValue::from("OK")]]);
    assert_eq!(client.pending_callbacks(), 0);
    assert!(!client.poll().unwrap());
    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(server.key_count(), 1);
}

#[test]
fn test_reply_shapes_reach_host() {
    let server = LoopbackServer::new();
    let mut client = connected_client(&server);
    let calls = Calls::default();

    client.set("a", "1", None).unwrap();
    client
        .send_host(&["MGET".into(), "a".into(), "missing".into()], Some(record(&calls)))
        .unwrap();
    client
        .send_host(&["INCR".into(), "a".into()], Some(record(&calls)))
        .unwrap();
    client.get("nope", Some(record(&calls))).unwrap();
    client
        .send_host(&["NOSUCH".into()], Some(record(&calls)))
        .unwrap();
    client.commit().unwrap();
    assert!(poll_until(&mut client, |_| calls.borrow().len() == 4));

    let calls = calls.borrow();
    assert_eq!(
        calls[0],
        vec![HostValue::Array(vec!["1".into(), HostValue::Nil])]
    );
    assert_eq!(calls[1], vec![HostValue::Number(2.0)]);
    assert_eq!(calls[2], vec![HostValue::Nil]);
    assert_eq!(calls[3], vec![HostValue::from("ERR unknown command 'NOSUCH'")]);
}

#[test]
fn test_handles_retired_after_each_reply() {
    let server = LoopbackServer::new();
    let mut client = connected_client(&server);
    let count = Rc::new(Cell::new(0));
    client
        .set_hook(Hook::OnDisconnected, Some(counter(&count)))
        .unwrap();

    for round in 0..10 {
        for n in 0..50 {
            client
                .set(&format!("k{n}"), &round.to_string(), Some(counter(&count)))
                .unwrap();
        }
        client.commit().unwrap();
        assert!(poll_until(&mut client, |c| c.pending_callbacks() == 1));
    }

    assert_eq!(count.get(), 500);
    assert_eq!(client.pending_callbacks(), 1);
    assert_eq!(server.key_count(), 50);
}

#[test]
fn test_callbacks_run_on_polling_thread() {
    let server = LoopbackServer::new();
    let mut client = connected_client(&server);
    let me = thread::current().id();
    let threads = Rc::new(RefCell::new(Vec::new()));

    for n in 0..100 {
        let threads = Rc::clone(&threads);
        client
            .get(
                &n.to_string(),
                Some(Callback::infallible(move |_| {
                    threads.borrow_mut().push(thread::current().id());
                })),
            )
            .unwrap();
    }
    client.commit().unwrap();
    assert!(poll_until(&mut client, |_| threads.borrow().len() == 100));

    assert!(threads.borrow().iter().all(|id| *id == me));
}

#[test]
fn test_close_with_queued_replies_invokes_nothing() {
    struct DropCounter(Rc<Cell<u32>>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let server = LoopbackServer::new();
    let mut client = connected_client(&server);
    let invoked = Rc::new(Cell::new(0));
    let retired = Rc::new(Cell::new(0));

    for key in ["a", "b", "c"] {
        let guard = DropCounter(Rc::clone(&retired));
        let invoked = Rc::clone(&invoked);
        client
            .get(
                key,
                Some(Callback::infallible(move |_| {
                    let _ = &guard;
                    invoked.set(invoked.get() + 1);
                })),
            )
            .unwrap();
    }
    client.commit().unwrap();

    let deadline = Instant::now() + DEADLINE;
    while client.pending_actions() < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(client.pending_actions(), 3);

    drop(client);
    assert_eq!(retired.get(), 3);
    assert_eq!(invoked.get(), 0);
}

#[test]
fn test_closed_session_is_null() {
    let server = LoopbackServer::new();
    let mut client = connected_client(&server);
    assert!(client.to_string().starts_with("[kvpoll_client: "));

    client.close();
    assert!(!client.is_valid());
    assert!(!client.is_connected());
    assert_eq!(client.to_string(), "[NULL kvpoll_client]");
    assert_eq!(client.poll(), Err(SessionError::Closed));
    assert_eq!(
        client.connect(ConnectOptions::default()),
        Err(SessionError::Closed)
    );
    let (value, message) = SessionError::Closed.to_host_result();
    assert!(value.is_nil());
    assert_eq!(message.as_str(), Some("NULL kvpoll object"));
}

#[test]
fn test_send_before_connect_fails_without_leaking() {
    init_test_tracing();
    let server = LoopbackServer::new();
    let mut client = Client::new(server.client());
    let calls = Calls::default();

    let err = client.get("k", Some(record(&calls))).unwrap_err();
    assert_eq!(err, SessionError::Network(NetworkError::NotConnected));
    assert_eq!(client.pending_callbacks(), 0);
    assert!(!client.poll().unwrap());
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_reconnects_after_server_drop() {
    let server = LoopbackServer::new();
    init_test_tracing();
    let mut client = Client::new(server.client());
    let connected = Rc::new(Cell::new(0));
    let disconnected = Rc::new(Cell::new(0));
    client
        .set_hook(Hook::OnConnected, Some(counter(&connected)))
        .unwrap();
    client
        .set_hook(Hook::OnDisconnected, Some(counter(&disconnected)))
        .unwrap();

    client
        .connect(ConnectOptions::default().reconnect_interval(Duration::from_millis(5)))
        .unwrap();
    assert!(poll_until(&mut client, |_| connected.get() == 1));

    server.drop_connections();
    assert!(poll_until(&mut client, |_| connected.get() == 2));
    assert_eq!(disconnected.get(), 1);
    assert_eq!(client.state(), SessionState::Connected);

    let calls = Calls::default();
    client.get("k", Some(record(&calls))).unwrap();
    client.commit().unwrap();
    assert!(poll_until(&mut client, |_| calls.borrow().len() == 1));
}

#[test]
fn test_gives_up_after_max_reconnects() {
    init_test_tracing();
    let server = LoopbackServer::new();
    server.set_available(false);
    let mut client = Client::new(server.client());
    let disconnected = Rc::new(Cell::new(0));
    client
        .set_hook(Hook::OnDisconnected, Some(counter(&disconnected)))
        .unwrap();

    client
        .connect(
            ConnectOptions::default()
                .max_reconnects(1)
                .reconnect_interval(Duration::from_millis(5)),
        )
        .unwrap();

    // Failed, Failed, then Stopped once retries are exhausted.
    assert!(poll_until(&mut client, |_| disconnected.get() == 3));
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!client.is_reconnecting());
    assert!(!client.is_connected());
}

#[test]
fn test_unresolvable_host_reports_disconnect() {
    init_test_tracing();
    let server = LoopbackServer::new();
    let mut client = Client::new(server.client());
    let disconnected = Rc::new(Cell::new(0));
    client
        .set_hook(Hook::OnDisconnected, Some(counter(&disconnected)))
        .unwrap();

    client
        .connect(ConnectOptions::new("db.invalid", 6379).max_reconnects(0))
        .unwrap();
    assert!(poll_until(&mut client, |_| disconnected.get() == 2));
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[test]
fn test_auth_then_select() {
    let server = LoopbackServer::with_password("hunter2");
    let mut client = connected_client(&server);
    let calls = Calls::default();

    client.get("k", Some(record(&calls))).unwrap();
    client.auth("hunter2", Some(record(&calls))).unwrap();
    client.select(2, Some(record(&calls))).unwrap();
    client.exists("k", Some(record(&calls))).unwrap();
    client.commit().unwrap();
    assert!(poll_until(&mut client, |_| calls.borrow().len() == 4));

    let calls = calls.borrow();
    assert_eq!(calls[0], vec![HostValue::from("NOAUTH Authentication required.")]);
    assert_eq!(calls[1], vec![HostValue::from("OK")]);
    assert_eq!(calls[2], vec![HostValue::from("OK")]);
    assert_eq!(calls[3], vec![HostValue::Number(0.0)]);
}

#[test]
fn test_pubsub_between_sessions() {
    let server = LoopbackServer::new();
    let mut client = connected_client(&server);
    let mut subscriber = Subscriber::new(server.subscriber());
    subscriber.connect(ConnectOptions::default()).unwrap();
    assert!(poll_until(&mut subscriber, |s| s.state() == SessionState::Connected));

    let messages = Calls::default();
    let acks = Calls::default();
    subscriber
        .set_hook(Hook::OnMessage, Some(record(&messages)))
        .unwrap();
    subscriber.subscribe("news", Some(record(&acks))).unwrap();
    subscriber.psubscribe("news.*", Some(record(&acks))).unwrap();
    subscriber.commit().unwrap();
    assert!(poll_until(&mut subscriber, |_| acks.borrow().len() == 2));
    assert_eq!(
        acks.borrow()[1],
        vec![HostValue::Array(vec![
            "psubscribe".into(),
            "news.*".into(),
            HostValue::Number(2.0),
        ])]
    );

    let receivers = Calls::default();
    client
        .publish("news.sport", "goal", Some(record(&receivers)))
        .unwrap();
    client.publish("news", "headline", None).unwrap();
    client.publish("weather", "rain", None).unwrap();
    client.commit().unwrap();
    assert!(poll_until(&mut client, |_| receivers.borrow().len() == 1));
    assert_eq!(receivers.borrow()[0], vec![HostValue::Number(1.0)]);

    assert!(poll_until(&mut subscriber, |_| messages.borrow().len() == 2));
    assert_eq!(
        *messages.borrow(),
        vec![
            vec![HostValue::from("news.sport"), HostValue::from("goal")],
            vec![HostValue::from("news"), HostValue::from("headline")],
        ]
    );
    assert_eq!(server.peer_count(), 1);

    subscriber.close();
    assert_eq!(server.peer_count(), 0);
}
