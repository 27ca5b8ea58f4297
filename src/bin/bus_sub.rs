//! Demo subscriber: logs everything received on the demo topics.
//!
//! Run with an optional config path (`.json` or `.toml`):
//!
//! ```text
//! bus_sub [config.json]
//! ```

use anyhow::Result;
use lanbus::{logging, Config, Module, ModuleContext, ModuleRegistry, Node, Scheduler};
use log::{info, warn};
use simplelog::LevelFilter;

struct LogSubscriber {
    topic: String,
}

impl Module for LogSubscriber {
    fn name(&self) -> &str {
        "log_subscriber"
    }

    fn run(&mut self, ctx: &mut ModuleContext) -> lanbus::Result<()> {
        let _counter = ctx.node.create_subscriber(&self.topic, |topic, payload| {
            match payload.try_into().map(u64::from_le_bytes) {
                Ok(value) => info!("recv [{}]: {}", topic, value),
                Err(_) => warn!("recv [{}]: {} bytes (not a counter)", topic, payload.len()),
            }
        });

        let _greeting = ctx.node.create_subscriber("demo/greeting", |topic, payload| {
            info!("recv [{}]: {}", topic, String::from_utf8_lossy(payload));
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
        None => Config::from_json_str(r#"{"type":"log_subscriber","topic":"demo/counter"}"#)?,
    };

    let mut registry = ModuleRegistry::new();
    registry.register("log_subscriber", |config| {
        Ok(Box::new(LogSubscriber {
            topic: config.get_str("topic").unwrap_or("demo/counter").to_owned(),
        }) as Box<dyn Module>)
    });

    let node = Node::new(&node_name("bus_sub"))?;
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
