use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use allods_map::{
    archive::{Archive, ArchiveWriter},
    color::Color,
    config::{Config, CONFIG_FILE},
    error::Error,
    palette::Palette,
    registry::{Registry, RegistryValue},
    resources::ResourceManager,
    screen::Screen,
    services::{LoadedMap, Services},
    sprite::Sprite,
};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "allods-map")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,
    /// Overrides `resources.data_dir`
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the contents of a resource archive
    #[command(arg_required_else_help = true)]
    List { archive: PathBuf },
    /// Extracts an asset, looking on disk first and then in the archives
    #[command(arg_required_else_help = true)]
    Extract {
        asset: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Builds a resource archive from a directory tree
    #[command(arg_required_else_help = true)]
    Pack { dir: PathBuf, output: PathBuf },
    /// Dumps a registry, or a single value from it
    #[command(arg_required_else_help = true)]
    Reg { asset: String, key: Option<String> },
    /// Exports every frame of a .256 or .16a sprite as PNG
    #[command(arg_required_else_help = true)]
    Sprites { asset: String },
    /// Renders one frame of a level to PNG
    #[command(arg_required_else_help = true)]
    Render {
        level: String,
        #[arg(short, long, default_value = "map.png")]
        output: PathBuf,
        #[arg(long, default_value_t = 640)]
        width: usize,
        #[arg(long, default_value_t = 480)]
        height: usize,
        #[arg(long, default_value_t = 0)]
        scroll_x: i32,
        #[arg(long, default_value_t = 0)]
        scroll_y: i32,
        /// Fixed logic ticks to run before drawing
        #[arg(long, default_value_t = 0)]
        ticks: u32,
        /// Leave the map unexplored instead of revealing it
        #[arg(long)]
        keep_fog: bool,
    },
    /// Writes the default configuration
    InitConfig { path: Option<PathBuf> },
}

fn list(path: &Path) -> Result<(), Error> {
    let archive = Archive::open(path)?;
    let files = archive.files();
    let width = files.iter().map(|f| f.path.len()).max().unwrap_or(4).max(4);

    let border = format!("+-{}-+------------+------------+", "-".repeat(width));
    println!("{}", border);
    println!("| {:width$} |     offset |       size |", "path", width = width);
    println!("{}", border);
    for f in files.iter().sorted_by(|a, b| a.path.cmp(&b.path)) {
        println!("| {:width$} | {:-10} | {:-10} |", f.path, f.offset, f.size, width = width);
    }
    println!("{}", border);
    Ok(())
}

fn extract(resources: &ResourceManager, asset: &str, output: Option<&Path>) -> Result<(), Error> {
    let data = resources.read_file(asset)?;

    let path = match output {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(asset.replace('\\', "/").rsplit('/').next().unwrap_or(asset)),
    };
    let mut f = File::create(&path)?;
    f.write_all(&data)?;

    info!("extracted {} bytes to `{}`", data.len(), path.display());
    Ok(())
}

fn pack(dir: &Path, output: &Path) -> Result<(), Error> {
    let writer = ArchiveWriter::from_dir(dir)?;
    writer.write_file(output)?;
    info!("packed `{}` into `{}`", dir.display(), output.display());
    Ok(())
}

fn describe(value: &RegistryValue) -> String {
    match value {
        RegistryValue::Absent => "<absent>".into(),
        RegistryValue::String(s) => format!("{:?}", s),
        RegistryValue::Float(f) => format!("{}", f),
        RegistryValue::Integer(i) => format!("{}", i),
        RegistryValue::Array(a) => format!("[{}]", a.iter().join(", ")),
    }
}

fn reg(resources: &ResourceManager, asset: &str, key: Option<&str>) -> Result<(), Error> {
    let registry = Registry::load(resources, asset)?;
    match key {
        Some(key) => println!("{}", describe(registry.get_value(key))),
        None => registry.for_each_value(|path, value| println!("{} = {}", path, describe(value))),
    }
    Ok(())
}

fn sprites(resources: &ResourceManager, asset: &str) -> Result<(), Error> {
    info!("extracting sprites from `{}`", asset);

    let sprite = Sprite::load(resources, asset)?;
    let palette = sprite.palette().cloned().unwrap_or_else(Palette::grayscale);

    let file_stem = Path::new(&asset.replace('\\', "/"))
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "sprite".into());

    for i in 0..sprite.frame_count() {
        let (width, height) = (sprite.width(i) as usize, sprite.height(i) as usize);
        if width == 0 || height == 0 {
            continue;
        }
        let mut screen = Screen::new(width, height);
        let mut ctx = screen.context();
        ctx.clear(Color::TRANSPARENT);
        sprite.draw(&mut ctx, 0, 0, i, palette.as_slice());

        let filename = format!("{}-{:02}.png", file_stem, i);
        screen.write_png(&filename)?;
    }
    info!("wrote {} frames", sprite.frame_count());
    Ok(())
}

struct RenderArgs {
    width: usize,
    height: usize,
    scroll: (i32, i32),
    ticks: u32,
    keep_fog: bool,
}

fn render(services: &Services, level: &str, output: &Path, args: RenderArgs) -> Result<(), Error> {
    let mut task = services.load_map(level)?;
    let mut waited = 0;
    let loaded = loop {
        if let Some(result) = task.poll() {
            break result?;
        }
        thread::sleep(Duration::from_millis(10));
        waited += 1;
        if waited % 100 == 0 {
            info!("still loading `{}`", level);
        }
    };
    let LoadedMap {
        mut world,
        classes,
        mut tiles,
    } = loaded;
    info!(
        "loaded {}x{} map with {} obstacle classes",
        world.width(),
        world.height(),
        classes.len()
    );

    if !args.keep_fog {
        world.reveal_all();
    }
    for _ in 0..args.ticks {
        world.fixed_tick(&classes);
    }

    let mut screen = Screen::new(args.width, args.height);
    let mut renderer = services.renderer();
    renderer.render(&mut screen.context(), &mut world, &mut tiles, &classes, args.scroll);
    screen.write_png(output)?;

    info!("rendered `{}` to `{}`", level, output.display());
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("allods_map=info")))
        .init();

    let cli = Cli::parse();

    let services = || -> Result<Services, Error> {
        let mut config = Config::load(&cli.config)?;
        if let Some(dir) = &cli.data_dir {
            config.resources.data_dir = dir.clone();
        }
        Services::new(config)
    };

    match &cli.command {
        Commands::List { archive } => list(archive)?,
        Commands::Extract { asset, output } => {
            extract(&services()?.resources, asset, output.as_deref())?;
        }
        Commands::Pack { dir, output } => pack(dir, output)?,
        Commands::Reg { asset, key } => {
            reg(&services()?.resources, asset, key.as_deref())?;
        }
        Commands::Sprites { asset } => {
            sprites(&services()?.resources, asset)?;
        }
        Commands::Render {
            level,
            output,
            width,
            height,
            scroll_x,
            scroll_y,
            ticks,
            keep_fog,
        } => {
            let args = RenderArgs {
                width: *width,
                height: *height,
                scroll: (*scroll_x, *scroll_y),
                ticks: *ticks,
                keep_fog: *keep_fog,
            };
            render(&services()?, level, output, args)?;
        }
        Commands::InitConfig { path } => {
            let path = path.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
            Config::default().save(path)?;
        }
    }
    Ok(())
}
