use std::env;
use std::sync::Arc;
use std::time::Duration;

use flexom_bridge::host::{Accessory, PlatformHost};
use flexom_bridge::{Platform, PlatformConfig};

/// Host that just prints what would be registered.
struct ConsoleHost;

impl PlatformHost for ConsoleHost {
    fn register_accessories(&self, accessories: &[Arc<Accessory>]) {
        for accessory in accessories {
            println!("+ {} ({})", accessory.display_name(), accessory.uuid());
        }
    }

    fn update_accessories(&self, accessories: &[Arc<Accessory>]) {
        for accessory in accessories {
            println!("~ {} ({})", accessory.display_name(), accessory.uuid());
        }
    }

    fn unregister_accessories(&self, accessories: &[Arc<Accessory>]) {
        for accessory in accessories {
            println!("- {} ({})", accessory.display_name(), accessory.uuid());
        }
    }
}

#[tokio::main]
async fn main() -> flexom_bridge::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let path = args.get(1).expect("usage: bridge <config.json>");
    let config = PlatformConfig::from_path(path)?;

    let platform = Platform::new(Arc::new(ConsoleHost), config);
    let Some(report) = platform.launch().await else {
        eprintln!("Discovery did not run, see log output");
        return Ok(());
    };
    println!(
        "{} zones, {} active, {} registered, {} removed, {} failed",
        report.zones, report.active, report.registered, report.removed, report.failed
    );

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        for zone in platform.zone_controls() {
            let light = zone.light().and_then(|l| l.is_on());
            let window = zone
                .window()
                .map(|w| (w.current_position(), w.target_position(), w.position_state()));
            println!("[{}] light: {light:?} | window: {window:?}", zone.zone().name);
        }
    }
}
