#![cfg(target_os = "linux")]

use intercom::Error;
use intercom::component::Component;
use intercom::listener::ListenerHandle;
use intercom::reactor::Reactor;
use intercom::time::{Repetition, Timer, TimerListener};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

struct Recorder {
    fired: Mutex<Vec<(u64, ThreadId)>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: Mutex::new(Vec::new()),
        })
    }
}

impl TimerListener for Recorder {
    fn on_timer_expired(&self, fired: u64) {
        self.fired.lock().unwrap().push((fired, thread::current().id()));
    }
}

struct Counter(AtomicU64);

impl TimerListener for Counter {
    fn on_timer_expired(&self, _fired: u64) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_timer_fires_exactly_the_requested_number_of_times() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let timer = Timer::new(&reactor).expect("Failed to create timer");

    timer.set_interval(Duration::from_millis(100));
    timer.set_number_of_repetition(3);

    let start = Instant::now();
    timer.start().expect("Failed to start timer");
    assert!(timer.is_armed());

    thread::sleep(Duration::from_millis(550));

    assert_eq!(timer.fired_count(), 3, "Timer should fire exactly three times");
    assert!(!timer.is_armed(), "Timer should disarm after its last expiry");
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[test]
fn test_one_shot_timer_fires_once() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let timer = Timer::new(&reactor).expect("Failed to create timer");

    timer.set_interval(Duration::from_millis(20));
    timer.set_number_of_repetition(0);
    assert_eq!(timer.repetition(), Repetition::OneTime);

    timer.start().expect("Failed to start timer");
    thread::sleep(Duration::from_millis(150));

    assert_eq!(timer.fired_count(), 1);
    assert!(!timer.is_armed());
}

#[test]
fn test_continuous_timer_runs_until_stopped() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let timer = Timer::new(&reactor).expect("Failed to create timer");

    timer.set_interval(Duration::from_millis(10));
    timer.enable_continuous();
    assert_eq!(timer.repetition(), Repetition::Infinite);

    timer.start().expect("Failed to start timer");
    thread::sleep(Duration::from_millis(120));

    assert!(timer.stop(), "Stopping an armed timer should disarm it");
    assert!(!timer.stop(), "Stop should be idempotent");

    let fired = timer.fired_count();
    assert!(fired >= 3, "Continuous timer fired only {fired} times");

    thread::sleep(Duration::from_millis(50));
    assert_eq!(timer.fired_count(), fired, "Stopped timer should not fire");

    timer.disable_continuous();
    assert_eq!(timer.repetition(), Repetition::OneTime);
}

#[test]
fn test_double_start_is_rejected() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let timer = Timer::new(&reactor).expect("Failed to create timer");

    timer.set_interval(Duration::from_secs(10));
    timer.start().expect("Failed to start timer");

    assert!(matches!(timer.start(), Err(Error::StateAssertion { .. })));

    timer.stop();
    timer.start().expect("A stopped timer can be started again");
}

#[test]
fn test_configuration_applies_on_next_start() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let timer = Timer::new(&reactor).expect("Failed to create timer");

    timer.set_interval(Duration::from_millis(20));
    timer.set_number_of_repetition(2);
    timer.start().expect("Failed to start timer");

    timer.set_number_of_repetition(-1);
    thread::sleep(Duration::from_millis(150));

    assert_eq!(timer.fired_count(), 2, "Running timer keeps the repetition it started with");
    assert!(!timer.is_armed());
}

#[test]
fn test_listeners_are_notified_on_their_own_context() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let component = Component::spawn().expect("Failed to spawn component");

    let (tx, rx) = mpsc::channel();
    component.push(move || tx.send(thread::current().id()).unwrap());
    let component_thread = rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let recorder = Recorder::new();
    let listener: Arc<dyn TimerListener> = recorder.clone();

    let timer = Timer::new(&reactor).expect("Failed to create timer");
    timer.set_interval(Duration::from_millis(20));
    timer.set_number_of_repetition(2);
    timer.add_listener(ListenerHandle::borrowed(&listener), component.channel().unwrap());
    timer.start().expect("Failed to start timer");

    let deadline = Instant::now() + Duration::from_secs(2);
    while recorder.fired.lock().unwrap().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let fired = recorder.fired.lock().unwrap().clone();
    assert_eq!(fired.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 2]);
    assert!(
        fired.iter().all(|(_, id)| *id == component_thread),
        "Listener should run on the component's thread"
    );

    drop(timer);
    component.exit();
    component.join();
}

#[test]
fn test_dropped_borrowed_listener_is_skipped_and_owned_one_kept() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let component = Component::spawn().expect("Failed to spawn component");

    let owned = Arc::new(Counter(AtomicU64::new(0)));
    let borrowed: Arc<dyn TimerListener> = Arc::new(Counter(AtomicU64::new(0)));

    let timer = Timer::new(&reactor).expect("Failed to create timer");
    timer.set_interval(Duration::from_millis(10));
    timer.set_number_of_repetition(3);
    timer.add_listener(ListenerHandle::owned(owned.clone()), component.channel().unwrap());
    timer.add_listener(ListenerHandle::borrowed(&borrowed), component.channel().unwrap());
    drop(borrowed);

    timer.start().expect("Failed to start timer");

    let deadline = Instant::now() + Duration::from_secs(2);
    while owned.0.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(owned.0.load(Ordering::SeqCst), 3);

    drop(timer);
    component.exit();
    component.join();
}

#[test]
fn test_removed_listener_is_not_notified() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let component = Component::spawn().expect("Failed to spawn component");

    let counter = Arc::new(Counter(AtomicU64::new(0)));
    let listener: Arc<dyn TimerListener> = counter.clone();

    let timer = Timer::new(&reactor).expect("Failed to create timer");
    timer.set_interval(Duration::from_millis(10));
    timer.add_listener(ListenerHandle::owned(listener.clone()), component.channel().unwrap());

    assert!(timer.remove_listener(&listener));
    assert!(!timer.remove_listener(&listener));

    timer.start().expect("Failed to start timer");
    thread::sleep(Duration::from_millis(80));

    assert_eq!(timer.fired_count(), 1);
    assert_eq!(counter.0.load(Ordering::SeqCst), 0);

    component.exit();
    component.join();
}

#[test]
fn test_dropping_timer_unregisters_it() {
    let reactor = Reactor::new().expect("Failed to create reactor");

    let timer = Timer::new(&reactor).expect("Failed to create timer");
    timer.set_interval(Duration::from_millis(10));
    timer.enable_continuous();
    timer.start().expect("Failed to start timer");

    let deadline = Instant::now() + Duration::from_secs(2);
    while reactor.registered_handles() != 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(reactor.registered_handles(), 1);

    drop(timer);

    let deadline = Instant::now() + Duration::from_secs(2);
    while reactor.registered_handles() != 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(reactor.registered_handles(), 0);
}
