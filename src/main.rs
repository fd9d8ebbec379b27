//! ferry - client for the ferryd file server
//!
//! `ferry list`, `ferry download <file> <zero|normal>`, or no command for an
//! interactive shell.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use tokio::runtime::Runtime;

use ferry::cli::{ClientCommand, ClientOpts};
use ferry::client::Client;
use ferry::progress::{format_bytes, DownloadProgress};
use ferry::TransferMode;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    let client = Client::new(opts.client_config());
    let show_progress = !opts.no_progress;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match opts.command {
        Some(ClientCommand::List) => list(&rt, &client),
        Some(ClientCommand::Download { file, mode }) => download(&rt, &client, &file, mode, show_progress),
        Some(ClientCommand::Shell) | None => shell(&rt, &client, show_progress),
    }
}

fn list(rt: &Runtime, client: &Client) -> Result<()> {
    let names = rt
        .block_on(client.list())
        .with_context(|| format!("LIST from {}", client.config().server))?;
    println!("\n=== Files on Server ===");
    for (i, name) in names.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    println!("=== Total: {} files ===\n", names.len());
    Ok(())
}

fn download(rt: &Runtime, client: &Client, file: &str, mode: TransferMode, show_progress: bool) -> Result<()> {
    let progress = DownloadProgress::new(show_progress);
    match rt.block_on(client.download_with_progress(file, mode, progress.bar())) {
        Ok(report) => {
            progress.finish_success(&report);
            println!("  Saved to: {}", report.path.display());
            println!("  Size: {}", format_bytes(report.bytes));
            Ok(())
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            Err(e).with_context(|| format!("DOWNLOAD {} ({} mode)", file, mode))
        }
    }
}

fn print_help() {
    println!("\n=== Available Commands ===");
    println!("  list                   - Show list of files on server");
    println!("  download <file> <mode> - Download file");
    println!("                           zero: kernel zero-copy (sendfile/splice)");
    println!("                           normal: traditional read/write");
    println!("  exit                   - Exit the client");
    println!();
}

fn shell(rt: &Runtime, client: &Client, show_progress: bool) -> Result<()> {
    println!("=== ferry client ({}) ===", client.config().server);
    println!("Type 'help' for commands.\n");

    let stdin = std::io::stdin();
    let mut input = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = input.next() else {
            // stdin closed
            return Ok(());
        };
        let line = line.context("read command")?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = words.first() else {
            continue;
        };

        // errors are reported and the shell keeps going
        let outcome = match first.to_ascii_lowercase().as_str() {
            "exit" | "quit" => {
                println!("Exiting...");
                return Ok(());
            }
            "help" => {
                print_help();
                Ok(())
            }
            "list" => list(rt, client),
            "download" => match words.as_slice() {
                [_, file, mode] => match mode.parse::<TransferMode>() {
                    Ok(mode) => download(rt, client, file, mode, show_progress),
                    Err(e) => Err(e.into()),
                },
                _ => {
                    println!("Usage: download <filename> <mode>");
                    println!("Mode: zero or normal");
                    Ok(())
                }
            },
            _ => {
                println!("Unknown command. Type 'help' for list of commands.");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            eprintln!("Error: {:#}", e);
        }
    }
}
