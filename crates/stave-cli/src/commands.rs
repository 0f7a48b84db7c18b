use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use stave_engine::{Document, EngineConfig};
use stave_journal::{inspect, read_log, LogEntry};
use stave_pool::{NodeArgs, Pool};
use stave_types::NodeId;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let format = cli.format;
    match cli.command {
        Command::Init(args) => cmd_init(args, config, format),
        Command::Info(args) => cmd_info(&args.path, format),
        Command::Tree(args) => cmd_tree(args, config, format),
        Command::Log(args) => cmd_log(args, format),
        Command::Checkpoint(args) => cmd_checkpoint(&args.path, config, format),
        Command::Verify(args) => cmd_verify(&args.path, config, format),
    }
}

fn print_json(value: serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_init(args: InitArgs, config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let root = NodeArgs::new().set("name", args.name.as_str());
    let doc = Document::create_with(&args.path, &root, config)
        .with_context(|| format!("cannot create document at {}", args.path.display()))?;
    let id = doc.document_id();
    doc.close()?;
    if format == OutputFormat::Json {
        return print_json(json!({ "document_id": id.to_string(), "path": args.path }));
    }
    println!(
        "{} Created document {} in {}",
        "✓".green().bold(),
        args.name.bold(),
        args.path.display()
    );
    println!("  Document: {}", id.to_string().cyan());
    Ok(())
}

fn cmd_info(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let summary = inspect(path)?;
    if format == OutputFormat::Json {
        let checkpoints: Vec<_> = summary
            .checkpoints
            .iter()
            .map(|c| match &c.header {
                Ok(h) => json!({
                    "sequence": c.sequence,
                    "commit_seq": h.commit_seq,
                    "bytes": h.payload_len,
                    "hash": h.payload_hash_hex(),
                    "created_at": h.created_at.to_rfc3339(),
                }),
                Err(e) => json!({ "sequence": c.sequence, "error": e }),
            })
            .collect();
        let segments: Vec<_> = summary
            .segments
            .iter()
            .map(|s| {
                json!({
                    "sequence": s.sequence,
                    "records": s.records,
                    "first_seq": s.first_seq,
                    "last_seq": s.last_seq,
                    "torn_bytes": s.torn_bytes,
                    "error": s.error,
                })
            })
            .collect();
        return print_json(json!({
            "document_id": summary.pointer.as_ref().map(|p| p.document_id.to_string()),
            "latest_checkpoint": summary.pointer.as_ref().map(|p| p.checkpoint),
            "checkpoints": checkpoints,
            "segments": segments,
        }));
    }

    match &summary.pointer {
        Some(p) => {
            println!("Document: {}", p.document_id.to_string().cyan());
            println!("Latest checkpoint: {}", p.checkpoint.to_string().bold());
        }
        None => println!("{} state.latest is missing or unreadable", "✗".red().bold()),
    }
    println!("\nCheckpoints:");
    for c in &summary.checkpoints {
        match &c.header {
            Ok(h) => println!(
                "  {:>4}  commit {:<6} {:>9} bytes  {}  {}",
                c.sequence,
                h.commit_seq,
                h.payload_len,
                &h.payload_hash_hex()[..12],
                h.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            ),
            Err(e) => println!("  {:>4}  {}", c.sequence, e.red()),
        }
    }
    println!("\nLog segments:");
    for s in &summary.segments {
        let range = match (s.first_seq, s.last_seq) {
            (Some(first), Some(last)) => format!("commits {first}..={last}"),
            _ => "empty".to_string(),
        };
        let mut line = format!("  {:>4}  {:>6} records  {}", s.sequence, s.records, range);
        if s.torn_bytes > 0 {
            line.push_str(&format!("  ({} torn bytes)", s.torn_bytes).yellow().to_string());
        }
        println!("{line}");
        if let Some(e) = &s.error {
            println!("        {}", e.red());
        }
    }
    Ok(())
}

fn node_line(pool: &Pool, id: NodeId) -> String {
    let Ok(node) = pool.get(id) else {
        return format!("{} {}", "missing".red(), id.short_hex());
    };
    let props: Vec<String> = node
        .named_fields()
        .filter(|(spec, _)| !spec.kind.owns_children())
        .map(|(spec, value)| format!("{}={}", spec.name, value))
        .collect();
    format!(
        "{} {} {}",
        node.class().to_string().bold(),
        id.short_hex().dimmed(),
        props.join(" ")
    )
}

fn print_tree(pool: &Pool, id: NodeId, depth: usize) {
    println!("{}{}", "  ".repeat(depth), node_line(pool, id));
    if let Ok(node) = pool.get(id) {
        for child in node.children() {
            print_tree(pool, child, depth + 1);
        }
    }
}

fn cmd_tree(args: TreeArgs, config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let doc = if args.read_only {
        Document::open_read_only(&args.path)?
    } else {
        Document::open(&args.path, config)?
    };
    if format == OutputFormat::Json {
        print_json(serde_json::to_value(doc.pool().snapshot())?)?;
    } else {
        print_tree(doc.pool(), doc.root(), 0);
    }
    doc.close()?;
    Ok(())
}

fn cmd_log(args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let records = read_log(&args.path)?;
    let start = records.len().saturating_sub(args.limit);
    let shown = &records[start..];
    if format == OutputFormat::Json {
        let rows: Vec<_> = shown
            .iter()
            .map(|r| {
                let (target, minted) = match &r.entry {
                    LogEntry::Command { target, minted, .. } => {
                        (Some(target.to_hex()), minted.len())
                    }
                    _ => (None, 0),
                };
                json!({
                    "seq": r.seq,
                    "timestamp": r.timestamp.to_rfc3339(),
                    "entry": r.entry.label(),
                    "target": target,
                    "minted": minted,
                })
            })
            .collect();
        return print_json(json!(rows));
    }
    if shown.is_empty() {
        println!("No log records since the last checkpoint.");
        return Ok(());
    }
    for r in shown {
        let label = match &r.entry {
            LogEntry::Command { .. } => r.entry.label().cyan(),
            _ => r.entry.label().magenta(),
        };
        let detail = match &r.entry {
            LogEntry::Command { target, minted, .. } if minted.is_empty() => {
                format!("on {}", target.short_hex())
            }
            LogEntry::Command { target, minted, .. } => {
                format!("on {} (+{} nodes)", target.short_hex(), minted.len())
            }
            _ => String::new(),
        };
        println!(
            "{:>6}  {}  {} {}",
            r.seq.to_string().yellow(),
            r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            label,
            detail
        );
    }
    Ok(())
}

fn cmd_checkpoint(path: &Path, config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut doc = Document::open(path, config)?;
    let header = doc.checkpoint()?;
    doc.close()?;
    if format == OutputFormat::Json {
        return print_json(json!({
            "sequence": header.sequence,
            "commit_seq": header.commit_seq,
            "bytes": header.payload_len,
            "hash": header.payload_hash_hex(),
        }));
    }
    println!(
        "{} Checkpoint {} written at commit {} ({} bytes)",
        "✓".green().bold(),
        header.sequence.to_string().bold(),
        header.commit_seq,
        header.payload_len
    );
    Ok(())
}

fn cmd_verify(path: &Path, config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let config = EngineConfig {
        verify_on_open: true,
        ..config
    };
    let doc = Document::open(path, config)?;
    let dangling = doc.pool().dangling_references().len();
    let nodes = doc.pool().len();
    let commit_seq = doc.commit_seq();
    doc.close()?;
    if format == OutputFormat::Json {
        return print_json(json!({
            "ok": true,
            "commit_seq": commit_seq,
            "nodes": nodes,
            "dangling_references": dangling,
        }));
    }
    println!("{} Document verified", "✓".green().bold());
    println!("  Replayed to commit: {}", commit_seq.to_string().bold());
    println!("  Nodes: {}", nodes);
    println!("  Ownership: {}", "single owner, contiguous indices".green());
    println!("  Dangling references: {}", dangling.to_string().green());
    Ok(())
}
