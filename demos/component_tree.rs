//! Example: Component tree sharing one worker thread

use intercom::component::Component;

use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

fn main() -> intercom::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // The root owns a worker thread; children run on it too
    let root = Component::spawn()?;
    let left = Component::child_of(&root)?;
    let right = Component::child_of(&root)?;
    let leaf = Component::child_of(&left)?;

    root.on_child_exit(|child| println!("child {} detached", child.id()));

    for (name, component) in [("left", &left), ("right", &right), ("leaf", &leaf)] {
        component.push(move || {
            let thread = thread::current();
            println!("{name} running on {}", thread.name().unwrap_or("?"));
        });
    }

    thread::sleep(Duration::from_millis(100));

    // Exiting the root takes the whole subtree down first
    root.exit();
    root.join();

    println!(
        "exited: root={} left={} right={} leaf={}",
        root.is_exited(),
        left.is_exited(),
        right.is_exited(),
        leaf.is_exited()
    );

    Ok(())
}
