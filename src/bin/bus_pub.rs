//! Demo publisher: periodically publishes a counter and a greeting.
//!
//! Run with an optional config path (`.json` or `.toml`):
//!
//! ```text
//! bus_pub [config.json]
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lanbus::{logging, Config, Module, ModuleContext, ModuleRegistry, Node, Scheduler};
use log::info;
use simplelog::LevelFilter;

struct CounterPublisher {
    topic: String,
    period: Duration,
}

impl Module for CounterPublisher {
    fn name(&self) -> &str {
        "counter_publisher"
    }

    fn run(&mut self, ctx: &mut ModuleContext) -> lanbus::Result<()> {
        let publisher = ctx.node.create_publisher(&self.topic);
        let counter = Arc::new(AtomicU64::new(0));
        ctx.scheduler.add_periodic("counter_pub", self.period, move || {
            let value = counter.fetch_add(1, Ordering::Relaxed);
            info!("send [{}]: {}", publisher.topic(), value);
            publisher.publish_le(value);
        });

        let greeting = ctx.node.create_publisher("demo/greeting");
        ctx.scheduler.add_periodic("greeting_pub", self.period * 2, move || {
            greeting.publish_str("hello from lanbus");
        });

        Ok(())
    }
}

fn node_name(prefix: &str) -> String {
    match hostname::get().ok().and_then(|name| name.into_string().ok()) {
        Some(host) => format!("{}-{}", prefix, host),
        None => prefix.to_owned(),
    }
}

fn main() -> Result<()> {
    logging::init(LevelFilter::Info, None)?;

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_json_str(
            r#"{"type":"counter_publisher","topic":"demo/counter","period_ms":1000}"#,
        )?,
    };

    let mut registry = ModuleRegistry::new();
    registry.register("counter_publisher", |config| {
        Ok(Box::new(CounterPublisher {
            topic: config.get_str("topic").unwrap_or("demo/counter").to_owned(),
            period: Duration::from_millis(config.get_u64("period_ms").unwrap_or(1000)),
        }) as Box<dyn Module>)
    });

    let node = Node::new(&node_name("bus_pub"))?;
    node.start();

    let scheduler = Scheduler::new();
    let mut module = registry.create(&config)?;
    let mut ctx = ModuleContext {
        node: node.clone(),
        scheduler: scheduler.clone(),
    };
    module.run(&mut ctx)?;

    info!("{} running as {}", module.name(), node.node_id());
    scheduler.run();

    node.stop();
    Ok(())
}
