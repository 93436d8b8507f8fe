#![forbid(unsafe_code)]

//! `scene-sync-ctl` — local CLI companion for `scene-sync`.
//!
//! Connects to the IPC socket and sends JSON commands to the harness.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "scene-sync-ctl",
    about = "Local CLI for the scene-sync harness",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the harness `ipc_name` config).
    #[arg(long, default_value = "scene-sync")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show connection state, peer, and session counts.
    Status,

    /// List effective values (baseline with session edits applied).
    Values {
        /// Only values from this module.
        #[arg(long)]
        module: Option<String>,
        /// Only values whose name contains this text.
        #[arg(long)]
        filter: Option<String>,
    },

    /// Record an edit in the session and send it as SYNC.
    Edit {
        /// Module (source file) the value belongs to.
        file: String,
        /// Value name.
        name: String,
        /// Value type (string, int, float, bool).
        #[arg(long = "type", default_value = "string")]
        value_type: String,
        /// New value.
        value: String,
    },

    /// Send an ASYNC command without recording it.
    Async {
        /// Module (source file) the value belongs to.
        file: String,
        /// Value name.
        name: String,
        /// Value type (string, int, float, bool).
        #[arg(long = "type", default_value = "string")]
        value_type: String,
        /// New value.
        value: String,
    },

    /// Drop every session edit.
    Clear,

    /// Re-send every session edit to the connected client.
    Resend,

    /// Ask the client for a screenshot.
    Screenshot {
        /// Target file; generated when omitted.
        path: Option<String>,
    },

    /// Play a precondition script, or list scripts when none is given.
    Precondition {
        /// Script name or path.
        script: Option<String>,
    },

    /// Show the most used edits, or clear them.
    History {
        /// Forget every remembered edit.
        #[arg(long)]
        clear: bool,
    },

    /// Repeat a remembered edit by its rank in `history`, or by value.
    ApplyCommon {
        /// 1-based rank from `history`.
        #[arg(conflicts_with_all = ["file", "name", "value"])]
        rank: Option<usize>,
        /// Module (source file) the value belongs to.
        #[arg(long, requires_all = ["name", "value"])]
        file: Option<String>,
        /// Value name.
        #[arg(long)]
        name: Option<String>,
        /// Value to apply.
        #[arg(long)]
        value: Option<String>,
    },

    /// Query or change the asset folder watcher.
    Watch {
        #[command(subcommand)]
        action: WatchAction,
    },

    /// Restart the client with the staged asset.
    StartClient,

    /// Stage an asset package and restart the client with it.
    Respawn {
        /// Asset package path.
        path: String,
    },
}

#[derive(Debug, Subcommand)]
enum WatchAction {
    /// Show whether the watcher is active.
    Status,
    /// Start watching.
    On,
    /// Stop watching.
    Off,
    /// Watch a different folder.
    Folder {
        /// Folder to watch recursively.
        path: String,
    },
}

fn main() {
    let args = Cli::parse();

    let request_json = match &args.command {
        Command::Status => serde_json::json!({ "command": "status" }),
        Command::Values { module, filter } => {
            let mut req = serde_json::json!({ "command": "values" });
            if let Some(m) = module {
                req["module"] = serde_json::Value::String(m.clone());
            }
            if let Some(f) = filter {
                req["filter"] = serde_json::Value::String(f.clone());
            }
            req
        }
        Command::Edit {
            file,
            name,
            value_type,
            value,
        } => serde_json::json!({
            "command": "edit",
            "file": file,
            "name": name,
            "type": value_type,
            "value": value,
        }),
        Command::Async {
            file,
            name,
            value_type,
            value,
        } => serde_json::json!({
            "command": "async",
            "file": file,
            "name": name,
            "type": value_type,
            "value": value,
        }),
        Command::Clear => serde_json::json!({ "command": "clear" }),
        Command::Resend => serde_json::json!({ "command": "resend" }),
        Command::Screenshot { path } => {
            let mut req = serde_json::json!({ "command": "screenshot" });
            if let Some(p) = path {
                req["path"] = serde_json::Value::String(p.clone());
            }
            req
        }
        Command::Precondition { script } => {
            let mut req = serde_json::json!({ "command": "precondition" });
            if let Some(s) = script {
                req["path"] = serde_json::Value::String(s.clone());
            }
            req
        }
        Command::History { clear } => serde_json::json!({
            "command": "history",
            "action": if *clear { "clear" } else { "list" },
        }),
        Command::ApplyCommon {
            rank,
            file,
            name,
            value,
        } => {
            let mut req = serde_json::json!({ "command": "apply-common" });
            if let Some(r) = rank {
                req["rank"] = serde_json::Value::from(*r);
            }
            for (key, field) in [("file", file), ("name", name), ("value", value)] {
                if let Some(v) = field {
                    req[key] = serde_json::Value::String(v.clone());
                }
            }
            req
        }
        Command::Watch { action } => match action {
            WatchAction::Status => serde_json::json!({ "command": "watch", "action": "status" }),
            WatchAction::On => serde_json::json!({ "command": "watch", "action": "on" }),
            WatchAction::Off => serde_json::json!({ "command": "watch", "action": "off" }),
            WatchAction::Folder { path } => {
                serde_json::json!({ "command": "watch", "action": "folder", "path": path })
            }
        },
        Command::StartClient => serde_json::json!({ "command": "start-client" }),
        Command::Respawn { path } => {
            serde_json::json!({ "command": "respawn", "path": path })
        }
    };

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to harness: {err}");
            eprintln!("Is scene-sync running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
