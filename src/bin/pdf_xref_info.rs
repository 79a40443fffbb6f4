//! Print the structure of a PDF file.
//!
//! ```text
//! pdf_xref_info <file.pdf> [--password PW] [--strict] [--on-demand] [--text] [--entries]
//! ```
//!
//! Prints a JSON summary unless `--text` is given. Set `RUST_LOG=debug` to
//! follow the XRef chain as it is read.

use std::path::PathBuf;
use std::process;

use pdf_xref::{Error, ParserOptions, PdfDocument, XRefEntry};

struct InfoConfig {
    path: PathBuf,
    options: ParserOptions,
    text: bool,
    list_entries: bool,
}

impl InfoConfig {
    fn from_args() -> Option<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut path = None;
        let mut options = ParserOptions::lenient();
        let mut text = false;
        let mut list_entries = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--password" | "-p" => {
                    i += 1;
                    if i < args.len() {
                        options = options.with_password(args[i].clone());
                    }
                },
                "--strict" => options = options.with_strict(true),
                "--on-demand" => options = options.with_load_on_demand(true),
                "--text" => text = true,
                "--entries" => list_entries = true,
                other if !other.starts_with('-') && path.is_none() => path = Some(PathBuf::from(other)),
                other => eprintln!("Ignoring unknown argument {}", other),
            }
            i += 1;
        }

        path.map(|path| Self {
            path,
            options,
            text,
            list_entries,
        })
    }
}

fn main() {
    env_logger::init();

    let Some(config) = InfoConfig::from_args() else {
        eprintln!("Usage: pdf_xref_info <file.pdf> [--password PW] [--strict] [--on-demand] [--text] [--entries]");
        process::exit(2);
    };

    let doc = match PdfDocument::open(&config.path, config.options.clone()) {
        Ok(doc) => doc,
        Err(e) => {
            report_error(&e);
            process::exit(1);
        },
    };

    let summary = doc.summary();
    if !config.text {
        let mut value = match serde_json::to_value(&summary) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("Cannot serialize summary: {}", e);
                process::exit(1);
            },
        };
        if config.list_entries {
            let entries: serde_json::Map<String, serde_json::Value> = doc
                .xref_table()
                .iter()
                .filter_map(|(n, entry)| serde_json::to_value(entry).ok().map(|v| (n.to_string(), v)))
                .collect();
            value["entries"] = serde_json::Value::Object(entries);
        }
        match serde_json::to_string_pretty(&value) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Cannot serialize summary: {}", e);
                process::exit(1);
            },
        }
        return;
    }

    println!("File:                {}", config.path.display());
    println!("Size:                {} bytes", summary.file_size);
    println!("Version:             {} (header {})", summary.version, summary.header_version);
    println!("XRef offset:         {}", summary.xref_offset);
    println!("XRef streams:        {}", if summary.has_xref_stream { "yes" } else { "no" });
    println!("Incremental updates: {}", summary.incremental_updates);
    println!("Reconstructed:       {}", if summary.reconstructed { "yes" } else { "no" });
    println!("Encrypted:           {}", if summary.encrypted { "yes" } else { "no" });
    println!("XRef slots:          {}", summary.xref_slots);
    println!("Objects loaded:      {}", summary.objects_loaded);
    println!("Free objects:        {}", summary.free_objects.len());
    println!("Trailer:");
    for (key, value) in &summary.trailer {
        println!("  /{} {}", key, value);
    }

    if config.list_entries {
        println!("Entries:");
        for (number, entry) in doc.xref_table().iter() {
            match entry {
                XRefEntry::Free { next_free, generation } => {
                    println!("  {:>6} free       next {} gen {}", number, next_free, generation)
                },
                XRefEntry::InUse { offset, generation } => {
                    println!("  {:>6} in use     offset {} gen {}", number, offset, generation)
                },
                XRefEntry::Compressed { stream_object, index } => {
                    println!("  {:>6} compressed stream {} index {}", number, stream_object, index)
                },
            }
        }
    }
}

fn report_error(e: &Error) {
    match e.phase() {
        Some(phase) => eprintln!("Failed while reading {}: {}", phase, e.root_cause()),
        None => eprintln!("Failed: {}", e),
    }
}
