// Copyright (c) The gotron Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A stand-in for the matchmaking server and the client.
//!
//! Invoked with one address it acts as the server, with four as a client, mirroring the real
//! programs' command lines. It writes the same two log files the real programs write, in the
//! current directory, then idles until it is killed.
//!
//! Log files are written to a temporary name and renamed into place, so a test that sees the file
//! also sees its full contents.

use std::{
    env, fs, io,
    path::Path,
    process::exit,
    thread,
    time::Duration,
};

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let logs = match args.as_slice() {
        [listen] => server_logs(listen),
        [node, rpc, ms, http] => client_logs(node, rpc, ms, http),
        _ => {
            eprintln!("[fake-peer] usage: fake-peer <listen-addr>");
            eprintln!("[fake-peer]        fake-peer <node-addr> <rpc-addr> <ms-addr> <http-addr>");
            exit(2);
        }
    };

    let stem = logs.identity.replace(':', "");
    if let Err(error) = write_atomically(&format!("{stem}-Log.txt"), &logs.causal)
        .and_then(|()| write_atomically(&format!("{stem}-local.txt"), &logs.local))
    {
        eprintln!("[fake-peer] failed to write logs: {error}");
        exit(1);
    }

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

struct Logs {
    identity: String,
    local: String,
    causal: String,
}

fn server_logs(listen: &str) -> Logs {
    // The real server names itself after its resolved address.
    let port = listen.rsplit(':').next().unwrap_or(listen);
    let identity = format!("127.0.0.1:{port}");
    Logs {
        local: format!("[args: {listen}]\n[Listening on {listen}]\n"),
        causal: format!("{identity} {{\"{identity}\":1}}\nInitialization Complete\n"),
        identity,
    }
}

fn client_logs(node: &str, rpc: &str, ms: &str, http: &str) -> Logs {
    let identity = node.to_owned();
    Logs {
        local: format!("[args: {node} {rpc} {ms} {http}]\n[Im a node:  {node}]\n"),
        causal: format!(
            "{identity} {{\"{identity}\":1}}\nInitialization Complete\n\
             {identity} {{\"{identity}\":2}}\nRpc Call Context.Join to {ms}\n"
        ),
        identity,
    }
}

fn write_atomically(name: &str, contents: &str) -> io::Result<()> {
    let tmp = format!(".{name}.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, Path::new(name))
}
