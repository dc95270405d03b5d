mod output;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use output::{
    ChannelInfo, ChannelsOutput, CopyOutput, EdgeOutput, FilesOutput, FormatInfo, FormatsOutput,
    GcOutput, ImportOutput, InitOutput, JournalEntryInfo, JournalOutput, NodeInfo, NodesOutput,
    OrphansOutput, OutputWriter,
};
use shelf_core::{
    ChannelId, ChannelManifest, ContentId, ContentKind, ContentMetadata, ContentRef, EdgeChange,
    FormatScope, Library, LibraryConfig,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

/// Shelf - content graph engine and content-copy store
#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "Offline channel content graph with a content-addressed copy store", long_about = None)]
#[command(version)]
struct Cli {
    /// Home directory (defaults to SHELF_HOME env var or ./shelf-home)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// A content node of a channel.
#[derive(Args)]
struct NodeArgs {
    /// Channel id
    channel: ChannelId,

    /// Content id of the node (defaults to the channel root)
    #[arg(short, long)]
    content: Option<ContentId>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the home directory
    Init,

    /// Import a channel from a JSON manifest
    Import {
        /// Path to the manifest
        manifest: PathBuf,
    },

    /// List attached channels
    Channels,

    /// Direct children of a node
    Children(NodeArgs),

    /// Topic ancestors of a node, from the root down
    Ancestors(NodeArgs),

    /// Leaf descendants of a node
    Leaves(NodeArgs),

    /// Descendants of a node with the given kind
    Kind {
        #[command(flatten)]
        node: NodeArgs,

        /// Content kind (topic, video, audio, exercise, document, html5)
        kind: ContentKind,
    },

    /// Formats of the leaves under a node
    Formats {
        #[command(flatten)]
        node: NodeArgs,

        /// Which formats to report
        #[arg(long, default_value = "all")]
        scope: FormatScope,
    },

    /// Files under a node without a content copy
    Missing(NodeArgs),

    /// Files under a node with the given quality
    Quality {
        #[command(flatten)]
        node: NodeArgs,

        /// Format quality
        quality: String,
    },

    /// Prerequisites of a node
    Prerequisites(NodeArgs),

    /// Nodes related to a node
    Related(NodeArgs),

    /// Declare that one node must be completed before another
    SetPrerequisite {
        /// Channel id
        channel: ChannelId,

        /// Content id of the prerequisite
        prerequisite: ContentId,

        /// Content id of the node that requires it
        content: ContentId,
    },

    /// Declare two nodes related
    SetRelated {
        /// Channel id
        channel: ChannelId,

        /// Content id of the first node
        content: ContentId,

        /// Content id of the second node
        related: ContentId,
    },

    /// Copy a file into the store for a File row (omit source to clear)
    Copy {
        /// Channel id
        channel: ChannelId,

        /// File row id
        file_id: i64,

        /// File to copy
        source: Option<PathBuf>,
    },

    /// Garbage collect unreferenced content copies
    Gc {
        /// Dry run - show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// List content copies no channel references
    Orphans,

    /// Show recent store operations
    Journal {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let out = OutputWriter::new(cli.json);

    // Determine home: CLI arg > SHELF_HOME env var > ./shelf-home default
    let home = cli
        .home
        .or_else(|| std::env::var("SHELF_HOME").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./shelf-home"));

    match run(&home, cli.command, &out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = output::result_code(&e);
            debug!(result_code = code, error = ?e, "command failed");
            out.write_error(&e, code);
            ExitCode::from(code)
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(home: &Path, command: Commands, out: &OutputWriter) -> Result<()> {
    if let Commands::Init = command {
        return cmd_init(home, out);
    }
    if !home.exists() {
        anyhow::bail!(
            "No shelf home at {} (use 'shelf init' to create one)",
            home.display()
        );
    }

    debug!(home = %home.display(), "opening library");
    let library = Library::open_home(home)
        .with_context(|| format!("Failed to open library at {}", home.display()))?;
    debug!(channels = library.channels().len(), "library open");

    match command {
        Commands::Init => cmd_init(home, out),
        Commands::Import { manifest } => cmd_import(&library, &manifest, out),
        Commands::Channels => cmd_channels(&library, out),
        Commands::Children(node) => cmd_nodes(&library, &node, out, |channel, content| {
            library.immediate_children(channel, content)
        }),
        Commands::Ancestors(node) => cmd_nodes(&library, &node, out, |channel, content| {
            library.get_ancestor_topics(channel, content)
        }),
        Commands::Leaves(node) => cmd_nodes(&library, &node, out, |channel, content| {
            library.leaves(channel, content)
        }),
        Commands::Kind { node, kind } => cmd_nodes(&library, &node, out, |channel, content| {
            library.children_of_kind(channel, content, kind)
        }),
        Commands::Formats { node, scope } => cmd_formats(&library, &node, scope, out),
        Commands::Missing(node) => cmd_missing(&library, &node, out),
        Commands::Quality { node, quality } => cmd_quality(&library, &node, &quality, out),
        Commands::Prerequisites(node) => cmd_nodes(&library, &node, out, |channel, content| {
            library.get_all_prerequisites(channel, content)
        }),
        Commands::Related(node) => cmd_nodes(&library, &node, out, |channel, content| {
            library.get_all_related(channel, content)
        }),
        Commands::SetPrerequisite {
            channel,
            prerequisite,
            content,
        } => cmd_set_prerequisite(&library, &channel, prerequisite, content, out),
        Commands::SetRelated {
            channel,
            content,
            related,
        } => cmd_set_related(&library, &channel, content, related, out),
        Commands::Copy {
            channel,
            file_id,
            source,
        } => cmd_copy(&library, &channel, file_id, source.as_deref(), out),
        Commands::Gc { dry_run } => cmd_gc(&library, dry_run, out),
        Commands::Orphans => cmd_orphans(&library, out),
        Commands::Journal { count } => cmd_journal(&library, count, out),
    }
}

/// The node named by `node`, or the channel root.
fn resolve_node(library: &Library, node: &NodeArgs) -> Result<ContentRef> {
    if let Some(id) = node.content {
        return Ok(ContentRef::Id(id));
    }
    let root = library
        .channel(&node.channel)?
        .root()
        .with_context(|| format!("Failed to read root of {}", node.channel))?
        .ok_or_else(|| anyhow!("Channel {} has no content", node.channel))?;
    Ok(ContentRef::Node(root))
}

fn node_lines(nodes: &[NodeInfo]) -> String {
    let mut text = String::new();
    for node in nodes {
        let _ = writeln!(text, "{} {:<9} {}", node.content_id, node.kind, node.title);
    }
    text
}

fn cmd_init(home: &Path, out: &OutputWriter) -> Result<()> {
    let config = LibraryConfig::load(home)
        .with_context(|| format!("Failed to read configuration in {}", home.display()))?;
    let library = Library::open(config)
        .with_context(|| format!("Failed to initialize library at {}", home.display()))?;

    let config = library.config();
    let output = InitOutput {
        success: true,
        result_code: 0,
        home: config.home.display().to_string(),
        content_copy_dir: config.content_copy_dir.display().to_string(),
        channel_dir: config.channel_dir.display().to_string(),
        algorithm: library.store().algorithm().as_str().to_string(),
    };

    out.write(&output, || {
        format!(
            "Initialized shelf home at {}\nContent copies: {}\nChannels: {}\nAlgorithm: {}\n",
            output.home, output.content_copy_dir, output.channel_dir, output.algorithm
        )
    })
}

fn cmd_import(library: &Library, path: &Path, out: &OutputWriter) -> Result<()> {
    let manifest = ChannelManifest::load(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let channel = manifest.channel.channel_id.clone();

    let summary = library
        .import_manifest(&manifest)
        .with_context(|| format!("Failed to import channel {}", channel))?;

    let output = ImportOutput {
        success: true,
        result_code: 0,
        channel,
        summary,
    };

    out.write(&output, || {
        let s = &output.summary;
        format!(
            "Imported {}: {} nodes, {} formats, {} files, {} prerequisites, {} related\n",
            output.channel, s.content, s.formats, s.files, s.prerequisites, s.related
        )
    })
}

fn cmd_channels(library: &Library, out: &OutputWriter) -> Result<()> {
    let mut channels = Vec::new();
    for channel_id in library.channels() {
        let db = library.channel(&channel_id)?;
        let name = db
            .metadata()
            .with_context(|| format!("Failed to read metadata of {}", channel_id))?
            .map(|m| m.name);
        let content_count = db.content_count()?;
        channels.push(ChannelInfo {
            channel_id,
            name,
            content_count,
        });
    }

    let output = ChannelsOutput {
        success: true,
        result_code: 0,
        channels,
    };

    out.write(&output, || {
        if output.channels.is_empty() {
            return "No channels (use 'shelf import' to add one)\n".to_string();
        }
        let mut text = String::new();
        for channel in &output.channels {
            let _ = writeln!(
                text,
                "{} ({} nodes) {}",
                channel.channel_id,
                channel.content_count,
                channel.name.as_deref().unwrap_or("")
            );
        }
        text
    })
}

fn cmd_nodes(
    library: &Library,
    node: &NodeArgs,
    out: &OutputWriter,
    query: impl FnOnce(&ChannelId, &ContentRef) -> shelf_core::Result<Vec<ContentMetadata>>,
) -> Result<()> {
    let content = resolve_node(library, node)?;
    let nodes = query(&node.channel, &content)
        .with_context(|| format!("Failed to query {} in {}", content.content_id(), node.channel))?;

    let output = NodesOutput {
        success: true,
        result_code: 0,
        channel: node.channel.clone(),
        content: content.content_id(),
        nodes: nodes.into_iter().map(NodeInfo::from).collect(),
    };

    out.write(&output, || node_lines(&output.nodes))
}

fn cmd_formats(
    library: &Library,
    node: &NodeArgs,
    scope: FormatScope,
    out: &OutputWriter,
) -> Result<()> {
    let content = resolve_node(library, node)?;
    let formats = library
        .formats(&node.channel, &content, scope)
        .with_context(|| format!("Failed to list formats of {}", content.content_id()))?;

    let output = FormatsOutput {
        success: true,
        result_code: 0,
        scope: scope.as_str().to_string(),
        formats: formats.into_iter().map(FormatInfo::from).collect(),
    };

    out.write(&output, || {
        let mut text = String::new();
        for format in &output.formats {
            let _ = writeln!(
                text,
                "{} {} {} {}",
                format.id,
                format.quality,
                format.format_size,
                format.mimetype.as_deref().unwrap_or("-")
            );
        }
        text
    })
}

fn file_lines(output: &FilesOutput) -> String {
    let mut text = String::new();
    for file in &output.files {
        let _ = writeln!(
            text,
            "{} format={} {}",
            file.id,
            file.format,
            file.content_copy.as_deref().unwrap_or("(no copy)")
        );
    }
    text
}

fn cmd_missing(library: &Library, node: &NodeArgs, out: &OutputWriter) -> Result<()> {
    let content = resolve_node(library, node)?;
    let files = library
        .get_missing_files(&node.channel, &content)
        .with_context(|| format!("Failed to list missing files of {}", content.content_id()))?;

    let output = FilesOutput {
        success: true,
        result_code: 0,
        files,
    };
    out.write(&output, || file_lines(&output))
}

fn cmd_quality(
    library: &Library,
    node: &NodeArgs,
    quality: &str,
    out: &OutputWriter,
) -> Result<()> {
    let content = resolve_node(library, node)?;
    let files = library
        .get_files_for_quality(&node.channel, &content, quality)
        .with_context(|| format!("Failed to list {} files of {}", quality, content.content_id()))?;

    let output = FilesOutput {
        success: true,
        result_code: 0,
        files,
    };
    out.write(&output, || file_lines(&output))
}

fn cmd_set_prerequisite(
    library: &Library,
    channel: &ChannelId,
    prerequisite: ContentId,
    content: ContentId,
    out: &OutputWriter,
) -> Result<()> {
    library
        .set_prerequisite(channel, &prerequisite.into(), &content.into())
        .with_context(|| format!("Failed to make {} a prerequisite of {}", prerequisite, content))?;

    let output = EdgeOutput {
        success: true,
        result_code: 0,
        edge: "prerequisite".to_string(),
        from: prerequisite,
        to: content,
        created: true,
    };
    out.write(&output, || format!("{} -> {}\n", prerequisite, content))
}

fn cmd_set_related(
    library: &Library,
    channel: &ChannelId,
    content: ContentId,
    related: ContentId,
    out: &OutputWriter,
) -> Result<()> {
    let change = library
        .set_is_related(channel, &content.into(), &related.into())
        .with_context(|| format!("Failed to relate {} and {}", content, related))?;

    let output = EdgeOutput {
        success: true,
        result_code: 0,
        edge: "related".to_string(),
        from: content,
        to: related,
        created: change == EdgeChange::Created,
    };
    out.write(&output, || {
        if output.created {
            format!("{} <-> {}\n", content, related)
        } else {
            format!("{} <-> {} (already related)\n", content, related)
        }
    })
}

fn cmd_copy(
    library: &Library,
    channel: &ChannelId,
    file_id: i64,
    source: Option<&Path>,
    out: &OutputWriter,
) -> Result<()> {
    let file = library
        .update_content_copy_by_id(channel, file_id, source)
        .with_context(|| match source {
            Some(source) => format!("Failed to copy {} for file {}", source.display(), file_id),
            None => format!("Failed to clear content copy of file {}", file_id),
        })?;
    let path = library
        .content_copy_path(&file)?
        .map(|p| p.display().to_string());

    let output = CopyOutput {
        success: true,
        result_code: 0,
        file,
        path,
    };

    out.write(&output, || match &output.path {
        Some(path) => format!("{} {}\n", output.file.id, path),
        None => format!("{} (no copy)\n", output.file.id),
    })
}

fn cmd_gc(library: &Library, dry_run: bool, out: &OutputWriter) -> Result<()> {
    let stats = library
        .gc(dry_run)
        .with_context(|| "Failed to run garbage collection")?;

    let output = GcOutput {
        success: true,
        result_code: 0,
        dry_run,
        stats,
    };

    out.write(&output, || {
        if dry_run {
            format!(
                "Dry run - no content copies deleted\nWould delete {} content copies\nWould free {} bytes\n",
                output.stats.blobs_deleted, output.stats.bytes_freed
            )
        } else {
            format!(
                "Deleted {} content copies\nFreed {} bytes\n",
                output.stats.blobs_deleted, output.stats.bytes_freed
            )
        }
    })
}

fn cmd_orphans(library: &Library, out: &OutputWriter) -> Result<()> {
    let orphans = library
        .orphans()
        .with_context(|| "Failed to scan for orphaned content copies")?;

    let output = OrphansOutput {
        success: true,
        result_code: 0,
        orphans,
    };

    out.write(&output, || {
        if output.orphans.is_empty() {
            return "No orphaned content copies\n".to_string();
        }
        let mut text = String::new();
        for orphan in &output.orphans {
            let _ = writeln!(text, "{} {} bytes", orphan.path, orphan.size);
        }
        text
    })
}

fn cmd_journal(library: &Library, count: usize, out: &OutputWriter) -> Result<()> {
    let entries = library
        .store()
        .journal()
        .read_recent(count)
        .with_context(|| "Failed to read journal")?;

    let output = JournalOutput {
        success: true,
        result_code: 0,
        entries: entries.into_iter().map(JournalEntryInfo::from).collect(),
    };

    out.write(&output, || {
        let mut text = String::new();
        for entry in &output.entries {
            let _ = writeln!(
                text,
                "{} {:<7} {} {}",
                entry.timestamp_human,
                entry.operation,
                entry.blob,
                entry.metadata.as_deref().unwrap_or("")
            );
        }
        text
    })
}
