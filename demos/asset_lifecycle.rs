//! Example: Loading, sharing and releasing cached assets
//!
//! Run with `cargo run --example asset_lifecycle --features profiling`
//! to see the tracing output.

use std::rc::Rc;
use tracked_assets::prelude::*;
use tracked_assets::{BufferSink, InMemoryReader, JsonAsset, TextAsset};

fn main() -> Result<()> {
    #[cfg(feature = "profiling")]
    tracked_assets::logging::init_subscriber(tracing::Level::DEBUG);

    let reader = InMemoryReader::new()
        .with_file("intro.txt", "Once upon a time...")
        .with_file("level1.json", r#"{"enemies": 12, "music": "theme.ogg"}"#);
    let sink = Rc::new(BufferSink::new());
    let ctx = EngineContext::with_io(EngineConfig::default(), sink.clone(), Box::new(reader));

    println!("Loading assets...");
    let intro = ctx.assets().load::<TextAsset>("intro.txt")?;
    let level = ctx.assets().load::<JsonAsset>("level1.json")?;
    let shared = ctx.assets().copy_reference(&level)?;

    println!("  intro: {}", ctx.assets().get(&intro)?.text());
    println!("  enemies: {}", ctx.assets().get(&level)?.value()["enemies"]);
    println!(
        "  level1.json refcount: {:?}",
        ctx.assets().ref_count("level1.json")
    );

    println!("\nType confusion is caught:");
    match ctx.assets().load::<TextAsset>("level1.json") {
        Ok(_) => println!("  unexpected success"),
        Err(err) => println!("  {err}"),
    }

    println!("\nTracked memory:");
    ctx.memory().print_allocations(&*sink, LogSeverity::Info);
    for line in sink.messages() {
        println!("{line}");
    }

    ctx.assets().unload(shared)?;
    ctx.assets().unload(level)?;
    drop(intro);

    let stats = ctx.assets().stats();
    println!(
        "\nCache: {} loads, {} hits, {} unloads; {} live allocations",
        stats.loads,
        stats.hits,
        stats.unloads,
        ctx.memory().allocation_count()
    );
    Ok(())
}
