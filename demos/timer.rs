//! Example: Periodic timer delivering expiries to a component

use intercom::component::Component;
use intercom::listener::ListenerHandle;
use intercom::reactor::Reactor;
use intercom::time::{Timer, TimerListener};

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

struct Ticker {
    component: Component,
    last: u64,
}

impl TimerListener for Ticker {
    fn on_timer_expired(&self, fired: u64) {
        println!("tick #{fired}");

        if fired == self.last {
            self.component.exit();
        }
    }
}

fn main() -> intercom::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let reactor = Reactor::default_instance()?;
    let component = Component::new();

    let ticker = Arc::new(Ticker {
        component: component.clone(),
        last: 5,
    });

    // Fire five times, 200ms apart
    let timer = Timer::new(&reactor)?;
    timer.set_interval(Duration::from_millis(200));
    timer.set_number_of_repetition(5);

    if let Some(channel) = component.channel() {
        timer.add_listener(ListenerHandle::owned(ticker), channel);
    }

    timer.start()?;

    // Listener callbacks run here until the ticker exits the component
    component.exec();
    println!("Done after {} expiries", timer.fired_count());

    reactor.stop();
    Ok(())
}
