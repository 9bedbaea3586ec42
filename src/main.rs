//! tagsplice - In-place audio tag editing
//!
//! Command-line interface: show or edit the tags of MP3, WavPack, FLAC and
//! MP4 files.

use anyhow::{bail, Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use tagsplice::{
    AudioFile, FileRef, NamedRange, Picture, PropertyMap, Tag, TagKind, TagOptions, PICTURE_KEY,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Options
// =============================================================================

#[derive(Default)]
struct Options {
    // Basic fields
    title: Option<String>,   // -t
    artist: Option<String>,  // -a
    album: Option<String>,   // -A
    comment: Option<String>, // -c
    genre: Option<String>,   // -g
    year: Option<u32>,       // -y
    track: Option<u32>,      // -T

    // Properties
    replace: Vec<(String, String)>, // -R KEY=VALUE
    insert: Vec<(String, String)>,  // -I KEY=VALUE
    picture: Option<PathBuf>,       // -P <image>

    // Mode options
    strip: bool, // -s
    json: bool,  // -o json
    quiet: bool, // -q

    config: Option<PathBuf>, // -C <file>

    // Files
    files: Vec<PathBuf>,
}

impl Options {
    fn has_edits(&self) -> bool {
        self.title.is_some()
            || self.artist.is_some()
            || self.album.is_some()
            || self.comment.is_some()
            || self.genre.is_some()
            || self.year.is_some()
            || self.track.is_some()
            || !self.replace.is_empty()
            || !self.insert.is_empty()
            || self.picture.is_some()
    }
}

/// State of one file, printed as text or JSON
#[derive(Serialize)]
struct FileReport {
    path: String,
    format: &'static str,
    tags: Vec<TagKind>,
    title: String,
    artist: String,
    album: String,
    comment: String,
    genre: String,
    year: u32,
    track: u32,
    properties: PropertyMap,
    complex_properties: Vec<String>,
    ranges: Vec<NamedRange>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    lovely_env_logger::init_default();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let opts = parse_args(&args[1..])?;
    run(opts)
}

/// Value following a flag, or exit with an error
fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> &'a str {
    *i += 1;
    if *i >= args.len() {
        eprintln!("{}: -{} requires an argument", "error".red().bold(), flag);
        std::process::exit(1);
    }
    &args[*i]
}

fn parse_key_value(value: &str) -> Result<(String, String)> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("expected KEY=VALUE, got: {}", value),
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];

        if arg.starts_with('-') && arg.len() > 1 {
            let flag = &arg[1..];

            match flag {
                "t" => opts.title = Some(flag_value(args, &mut i, flag).to_string()),
                "a" => opts.artist = Some(flag_value(args, &mut i, flag).to_string()),
                "A" => opts.album = Some(flag_value(args, &mut i, flag).to_string()),
                "c" => opts.comment = Some(flag_value(args, &mut i, flag).to_string()),
                "g" => opts.genre = Some(flag_value(args, &mut i, flag).to_string()),
                "y" => {
                    let val = flag_value(args, &mut i, flag);
                    opts.year = Some(
                        val.parse()
                            .map_err(|_| anyhow::anyhow!("invalid year: {}", val))?,
                    );
                }
                "T" => {
                    let val = flag_value(args, &mut i, flag);
                    opts.track = Some(
                        val.parse()
                            .map_err(|_| anyhow::anyhow!("invalid track: {}", val))?,
                    );
                }
                "R" => opts
                    .replace
                    .push(parse_key_value(flag_value(args, &mut i, flag))?),
                "I" => opts
                    .insert
                    .push(parse_key_value(flag_value(args, &mut i, flag))?),
                "P" => opts.picture = Some(PathBuf::from(flag_value(args, &mut i, flag))),
                "C" => opts.config = Some(PathBuf::from(flag_value(args, &mut i, flag))),
                "o" => match flag_value(args, &mut i, flag) {
                    "json" => opts.json = true,
                    "text" => opts.json = false,
                    other => {
                        eprintln!(
                            "{}: unknown output format: {}",
                            "warning".yellow().bold(),
                            other
                        );
                    }
                },
                "s" => opts.strip = true,
                "q" => opts.quiet = true,
                "v" | "-version" => {
                    print_version();
                    std::process::exit(0);
                }
                "h" | "-help" => {
                    print_usage();
                    std::process::exit(0);
                }
                // Handle combined short flags like -sq
                _ if flag.chars().all(|c| "sq".contains(c)) => {
                    for c in flag.chars() {
                        match c {
                            's' => opts.strip = true,
                            'q' => opts.quiet = true,
                            _ => {}
                        }
                    }
                }
                _ => {
                    eprintln!("{}: unknown option: -{}", "warning".yellow().bold(), flag);
                }
            }
        } else {
            // It's a file
            opts.files.push(PathBuf::from(arg));
        }

        i += 1;
    }

    Ok(opts)
}

fn run(opts: Options) -> Result<()> {
    if opts.files.is_empty() {
        eprintln!("{}: no files specified", "error".red().bold());
        std::process::exit(1);
    }

    let tag_options = match &opts.config {
        Some(path) => TagOptions::load(path)?,
        None => TagOptions::default(),
    };

    let picture = match &opts.picture {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read image: {}", path.display()))?;
            Some(Picture::front_cover(data))
        }
        None => None,
    };

    let progress = if opts.files.len() > 1 && !opts.quiet && !opts.json {
        let bar = ProgressBar::new(opts.files.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    } else {
        None
    };

    let mut reports = Vec::new();
    let mut failures = 0;
    for path in &opts.files {
        let filename = display_name(path);
        if let Some(bar) = &progress {
            bar.set_message(filename.clone());
        }

        match process_file(path, &opts, &tag_options, picture.as_ref()) {
            Ok(report) => reports.push(report),
            Err(e) => {
                failures += 1;
                let line = format!("  {} {} - {:#}", "✗".red(), filename, e);
                match &progress {
                    Some(bar) => bar.println(line),
                    None => eprintln!("{}", line),
                }
            }
        }

        if let Some(bar) = &progress {
            bar.inc(1);
        }
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report, &opts);
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// File processing
// =============================================================================

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn process_file(
    path: &Path,
    opts: &Options,
    tag_options: &TagOptions,
    picture: Option<&Picture>,
) -> Result<FileReport> {
    let Some(mut file) = FileRef::open(path, tag_options)? else {
        bail!("unsupported file type");
    };
    if !file.file().is_valid() {
        bail!("not a valid {} file", file.kind().as_str());
    }

    let audio = file.file_mut();
    if opts.strip {
        audio.strip(&TagKind::ALL)?;
        log::debug!("{}: stripped all tags", path.display());
    }

    if opts.has_edits() {
        apply_edits(audio, opts, picture);
        audio.save()?;
    }

    Ok(report(path, file.file()))
}

fn apply_edits(file: &mut dyn AudioFile, opts: &Options, picture: Option<&Picture>) {
    {
        let mut tag = file.tag();
        if let Some(v) = &opts.title {
            tag.set_title(v);
        }
        if let Some(v) = &opts.artist {
            tag.set_artist(v);
        }
        if let Some(v) = &opts.album {
            tag.set_album(v);
        }
        if let Some(v) = &opts.comment {
            tag.set_comment(v);
        }
        if let Some(v) = &opts.genre {
            tag.set_genre(v);
        }
        if let Some(v) = opts.year {
            tag.set_year(v);
        }
        if let Some(v) = opts.track {
            tag.set_track(v);
        }
    }

    if !opts.replace.is_empty() || !opts.insert.is_empty() {
        let mut properties = file.properties();
        for (key, value) in &opts.replace {
            properties.replace(key, [value.as_str()]);
        }
        for (key, value) in &opts.insert {
            properties.insert(key, [value.as_str()]);
        }
        let rejected = file.set_properties(&properties);
        for key in rejected.keys() {
            log::warn!("property {} is not supported by any tag in this file", key);
            if !opts.quiet {
                eprintln!("  {} {} was not stored", "!".yellow(), key);
            }
        }
    }

    if let Some(picture) = picture {
        if !file.set_complex_properties(PICTURE_KEY, &[picture.to_variant_map()]) {
            eprintln!(
                "  {} {} files cannot hold pictures",
                "!".yellow(),
                file.format_name()
            );
        }
    }
}

fn report(path: &Path, file: &dyn AudioFile) -> FileReport {
    let view = file.tag_view();
    FileReport {
        path: path.display().to_string(),
        format: file.format_name(),
        tags: file.present_tags(),
        title: view.title(),
        artist: view.artist(),
        album: view.album(),
        comment: view.comment(),
        genre: view.genre(),
        year: view.year(),
        track: view.track(),
        properties: file.properties(),
        complex_properties: file.complex_property_keys(),
        ranges: file.ranges(),
    }
}

fn print_report(report: &FileReport, opts: &Options) {
    let filename = display_name(Path::new(&report.path));

    if opts.quiet {
        // Quiet mode: tab-separated output
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            filename, report.format, report.artist, report.album, report.track, report.title
        );
        return;
    }

    let tags: Vec<&str> = report.tags.iter().map(TagKind::as_str).collect();
    println!("{}", filename.cyan().bold());
    println!(
        "  Format:      {} ({})",
        report.format,
        if tags.is_empty() {
            "no tags".to_string()
        } else {
            tags.join(", ")
        }
    );
    println!("  Title:       {}", report.title.green());
    println!("  Artist:      {}", report.artist);
    println!("  Album:       {}", report.album);
    if report.year > 0 || report.track > 0 {
        println!("  Year/Track:  {} / {}", report.year, report.track);
    }
    if !report.properties.is_empty() {
        println!("  {}", "Properties:".bold());
        for line in report.properties.to_string().lines() {
            println!("    {}", line);
        }
    }
    if !report.complex_properties.is_empty() {
        println!("  Complex:     {}", report.complex_properties.join(", "));
    }
    for range in &report.ranges {
        log::debug!(
            "{}: {} at {} ({} bytes)",
            filename,
            range.name,
            range.range.offset,
            range.range.length
        );
    }
    println!();
}

// =============================================================================
// Help / Version
// =============================================================================

fn print_version() {
    println!("tagsplice version {}", VERSION);
    println!("In-place audio tag editing written in Rust");
}

fn print_usage() {
    println!("{} version {}", "tagsplice".green().bold(), VERSION);
    println!("In-place audio tag editing for MP3, WavPack, FLAC and MP4 files");
    println!();
    println!("{}", "USAGE:".cyan().bold());
    println!("    tagsplice [OPTIONS] <FILES>...");
    println!();
    println!("{}", "OPTIONS:".cyan().bold());
    println!("    -t <s>         Set title");
    println!("    -a <s>         Set artist");
    println!("    -A <s>         Set album");
    println!("    -c <s>         Set comment");
    println!("    -g <s>         Set genre");
    println!("    -y <n>         Set year");
    println!("    -T <n>         Set track number");
    println!("    -R KEY=VALUE   Replace a property");
    println!("    -I KEY=VALUE   Add a value to a property");
    println!("    -P <image>     Embed an image as the front cover");
    println!("    -s             Strip all tags");
    println!("    -o json        Print file state as JSON");
    println!("    -C <file>      Read tag options from a JSON file");
    println!("    -q             Quiet mode (tab-separated output)");
    println!("    -v             Show version");
    println!("    -h             Show this help");
    println!();
    println!("{}", "EXAMPLES:".cyan().bold());
    println!("    tagsplice song.mp3                      Show tags");
    println!("    tagsplice -t \"Intro\" -T 1 song.mp3      Set title and track");
    println!("    tagsplice -R ARTIST=Someone *.flac      Replace the artist");
    println!("    tagsplice -P cover.jpg album/*.m4a      Embed cover art");
    println!("    tagsplice -s song.mp3                   Remove every tag");
    println!("    tagsplice -o json song.wv               Dump as JSON");
    println!();
    println!("{}", "NOTES:".cyan().bold());
    println!("    - Audio data is never re-encoded; only tag bytes change");
    println!("    - Set RUST_LOG=debug to see scan and save decisions");
}
