use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tracked_assets::prelude::*;
use tracked_assets::{
    BinaryAsset, BufferSink, FileData, InMemoryReader, JsonAsset, TextAsset,
};

/// Mesh-like asset that keeps its vertex data in tracked memory
#[derive(Default)]
struct VertexBuffer {
    vertices: usize,
    loaded: bool,
}

impl Asset for VertexBuffer {
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let data: FileData<'_> = ctx.read_bytes()?;
        if data.len() % 12 != 0 {
            return Err(ctx.failure(format!("{} bytes is not a whole vertex count", data.len())));
        }
        self.vertices = data.len() / 12;
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.vertices = 0;
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

fn context() -> (EngineContext, Rc<BufferSink>) {
    let sink = Rc::new(BufferSink::new());
    let reader = InMemoryReader::new()
        .with_file("meshes/quad.bin", vec![0u8; 48])
        .with_file("meshes/broken.bin", vec![0u8; 13])
        .with_file("data/settings.json", r#"{"fullscreen": true}"#)
        .with_file("text/credits.txt", "made by people");
    let config = EngineConfig {
        identity_seed: Some(1),
        ..Default::default()
    };
    let ctx = EngineContext::with_io(config, sink.clone(), Box::new(reader));
    (ctx, sink)
}

#[test]
fn test_custom_asset_roundtrip() -> Result<()> {
    let (ctx, _) = context();
    let mesh = ctx.assets().load::<VertexBuffer>("meshes/quad.bin")?;
    assert_eq!(ctx.assets().get(&mesh)?.vertices, 4);

    // Only the asset itself stays resident; the file buffer was released
    assert_eq!(ctx.memory().bytes_for_tag(AllocationTag::File), 0);
    assert_eq!(
        ctx.memory().bytes_for_tag(AllocationTag::Asset),
        std::mem::size_of::<VertexBuffer>()
    );

    ctx.assets().unload(mesh)?;
    assert_eq!(ctx.memory().allocation_count(), 0);
    Ok(())
}

#[test]
fn test_rejected_asset_leaves_nothing_behind() {
    let (ctx, _) = context();
    let err = ctx
        .assets()
        .load::<VertexBuffer>("meshes/broken.bin")
        .unwrap_err();
    assert!(matches!(err, EngineError::LoadFailure { .. }));
    assert!(err.to_string().contains("meshes/broken.bin"));
    assert_eq!(ctx.memory().allocation_count(), 0);
    assert!(ctx.assets().loaded_paths().is_empty());
}

#[test]
fn test_builtin_asset_kinds() -> Result<()> {
    let (ctx, _) = context();
    let assets = ctx.assets();

    let json = assets.load::<JsonAsset>("data/settings.json")?;
    let text = assets.load::<TextAsset>("text/credits.txt")?;
    let bytes = assets.load::<BinaryAsset>("meshes/quad.bin")?;

    assert_eq!(assets.get(&json)?.value()["fullscreen"], true);
    assert_eq!(assets.get(&text)?.text(), "made by people");
    assert_eq!(assets.get(&bytes)?.data().len(), 48);
    assert_eq!(assets.len(), 3);
    assert_eq!(
        assets.loaded_paths(),
        vec!["data/settings.json", "meshes/quad.bin", "text/credits.txt"]
    );
    Ok(())
}

#[test]
fn test_same_file_as_two_types_conflicts() -> Result<()> {
    let (ctx, _) = context();
    let bytes = ctx.assets().load::<BinaryAsset>("meshes/quad.bin")?;
    let err = ctx.assets().load::<VertexBuffer>("meshes/quad.bin").unwrap_err();
    match err {
        EngineError::TypeConflict {
            stored, requested, ..
        } => {
            assert!(stored.ends_with("BinaryAsset"));
            assert!(requested.ends_with("VertexBuffer"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.assets().ref_count("meshes/quad.bin"), Some(1));
    assert!(ctx.assets().is_loaded(&bytes));
    Ok(())
}

#[test]
fn test_cache_statistics() -> Result<()> {
    let (ctx, _) = context();
    let assets = ctx.assets();

    let a = assets.load::<TextAsset>("text/credits.txt")?;
    let b = assets.load::<TextAsset>("text/credits.txt")?;
    let _ = assets.load::<TextAsset>("text/missing.txt");
    drop(a);
    drop(b);

    let stats = assets.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.load_failures, 1);
    assert_eq!(stats.unloads, 1);
    Ok(())
}

#[test]
fn test_filesystem_reader_with_asset_root() -> Result<()> {
    let root: PathBuf = std::env::temp_dir().join(format!(
        "tracked_assets_fs_{}",
        std::process::id()
    ));
    fs::create_dir_all(&root)?;
    fs::write(root.join("hello.txt"), "from disk")?;

    let config = EngineConfig {
        asset_root: root.clone(),
        ..Default::default()
    };
    {
        let ctx = EngineContext::new(config);
        let handle = ctx.assets().load::<TextAsset>("hello.txt")?;
        assert_eq!(ctx.assets().get(&handle)?.text(), "from disk");
        assert!(ctx.assets().load::<TextAsset>("absent.txt").is_err());
    }

    fs::remove_dir_all(&root)?;
    Ok(())
}

#[test]
fn test_config_from_json_drives_context() -> Result<()> {
    let config = EngineConfig::from_json_str(r#"{ "identity_seed": 5, "leak_severity": "Info" }"#)?;
    let sink = Rc::new(BufferSink::new());
    let ctx = EngineContext::with_io(config, sink.clone(), Box::new(InMemoryReader::new()));
    assert_eq!(ctx.config().identity_seed, Some(5));

    ctx.memory().alloc(8, AllocationTag::None)?;
    drop(ctx);
    assert!(sink.count_at(LogSeverity::Info) > 1);
    Ok(())
}
