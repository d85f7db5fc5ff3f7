// proctl - Process inspection and lifecycle control
// Command-line front end over the library

use anyhow::Context;
use clap::{Parser, Subcommand};
use proctl::{CreateOptions, Pid, ProcessQuery, ShowMode, WaitContext};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "proctl")]
#[command(about = "Inspect, launch, terminate and wait on processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print structured results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List running processes
    List {
        /// Only processes with this image name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the pid a query resolves to
    Exists { query: String },
    /// Print every pid running an image name
    FindAll { name: String },
    /// Show all metadata of a process
    Info { pid: Pid },
    /// Print the executable path of a process
    Path { pid: Pid },
    /// Print the command line of a process
    Cmdline {
        pid: Pid,
        #[arg(long, default_value_t = proctl::COMMAND_LINE_CAPACITY)]
        capacity: usize,
    },
    /// Print the parent pid of a process
    Parent { query: String },
    /// Terminate a process
    Kill {
        query: String,
        #[arg(long, default_value_t = 0)]
        code: u32,
    },
    /// Terminate a process and all of its descendants
    KillTree { query: String },
    /// Set the priority class (L, B, N, A, H or R)
    Priority { query: String, code: char },
    /// Wait for a process to appear
    Wait {
        name: String,
        /// Milliseconds; negative waits forever
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        timeout: i64,
    },
    /// Wait for a process to exit
    WaitClose {
        query: String,
        /// Milliseconds; negative waits forever
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        timeout: i64,
    },
    /// Launch a command line
    Run {
        command: String,
        #[command(flatten)]
        launch: LaunchArgs,
        /// Target desktop
        #[arg(long)]
        desktop: Option<String>,
        /// Wait this many milliseconds for the process to exit; negative waits forever
        #[arg(long, allow_negative_numbers = true)]
        wait_ms: Option<i64>,
        /// Release the process immediately and only print its pid
        #[arg(long, conflicts_with = "wait_ms")]
        detach: bool,
    },
    /// Launch a command line in the active console session (service context)
    RunSession {
        command: String,
        #[command(flatten)]
        launch: LaunchArgs,
    },
}

#[derive(clap::Args)]
struct LaunchArgs {
    /// Working directory
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Window show mode (SW_* value)
    #[arg(long, default_value_t = 1)]
    show: u16,
}

impl LaunchArgs {
    fn options(&self) -> CreateOptions {
        let mut options = CreateOptions::new().with_show_mode(ShowMode(self.show));
        if let Some(cwd) = &self.cwd {
            options = options.with_working_dir(cwd);
        }
        options
    }
}

fn emit<T: Serialize>(json: bool, value: &T, plain: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        plain(value);
    }
    Ok(())
}

fn parse_query(query: &str) -> anyhow::Result<ProcessQuery> {
    ProcessQuery::parse(query).with_context(|| format!("Invalid query '{}'", query))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    match cli.command {
        Commands::List { name } => {
            let mut entries = proctl::snapshot()?;
            if let Some(name) = name {
                entries.retain(|e| proctl::types::names_match(&e.name, &name));
            }
            emit(json, &entries, |entries| {
                for e in entries {
                    println!("{:>8} {:>8} {:>5}  {}", e.pid, e.parent_pid, e.thread_count, e.name);
                }
            })?;
        }
        Commands::Exists { query } => {
            let pid = proctl::exists(&query)?
                .with_context(|| format!("No process matches '{}'", query))?;
            println!("{}", pid);
        }
        Commands::FindAll { name } => {
            let pids = proctl::resolve_all(&name)?;
            emit(json, &pids, |pids| {
                for pid in pids {
                    println!("{}", pid);
                }
            })?;
        }
        Commands::Info { pid } => {
            let info = proctl::get_info(pid)?;
            emit(json, &info, |info| {
                println!("pid:          {}", info.pid);
                println!("parent:       {}", info.parent_pid);
                match info.session_id {
                    Some(session) => println!("session:      {}", session),
                    None => println!("session:      -"),
                }
                println!("threads:      {}", info.thread_count);
                println!("memory:       {} bytes", info.memory_usage_bytes);
                println!("path:         {}", info.exe_path);
                println!("command line: {}", info.command_line);
            })?;
        }
        Commands::Path { pid } => println!("{}", proctl::get_path(pid)?),
        Commands::Cmdline { pid, capacity } => {
            println!("{}", proctl::get_command_line(pid, capacity)?)
        }
        Commands::Parent { query } => println!("{}", proctl::parent_of(&parse_query(&query)?)?),
        Commands::Kill { query, code } => {
            let pid = proctl::terminate_by_query(&parse_query(&query)?, code)?;
            println!("{}", pid);
        }
        Commands::KillTree { query } => {
            let sweep = proctl::terminate_tree_by_query(&parse_query(&query)?)?;
            emit(json, &sweep, |sweep| {
                println!(
                    "{}: {} descendant(s) terminated, {} already gone, {} failed",
                    sweep.root,
                    sweep.terminated.len(),
                    sweep.already_gone.len(),
                    sweep.failed.len()
                );
            })?;
        }
        Commands::Priority { query, code } => {
            let pid = proctl::set_priority(&parse_query(&query)?, code)?;
            println!("{}", pid);
        }
        Commands::Wait { name, timeout } => {
            let mut ctx = WaitContext::new();
            let pid = proctl::wait_for_appearance(&name, proctl::timeout_from_millis(timeout), &mut ctx)?;
            println!("{}", pid);
        }
        Commands::WaitClose { query, timeout } => {
            let mut ctx = WaitContext::new();
            let query = parse_query(&query)?;
            if !proctl::wait_for_exit(&query, proctl::timeout_from_millis(timeout), &mut ctx)? {
                anyhow::bail!("'{}' is still running", query);
            }
        }
        Commands::Run {
            command,
            launch,
            desktop,
            wait_ms,
            detach,
        } => {
            let mut options = launch.options();
            if let Some(desktop) = desktop {
                options = options.with_desktop(desktop);
            }

            if detach {
                println!("{}", proctl::launch_fire_and_forget(&command, &options)?);
                return Ok(());
            }

            let mut spawned = proctl::create(&command, &options)?;
            println!("{}", spawned.pid);
            if let Some(wait_ms) = wait_ms {
                let mut ctx = WaitContext::new();
                let timeout = proctl::timeout_from_millis(wait_ms);
                if !proctl::wait_for_handle_exit(&mut spawned.handle, timeout, &mut ctx)? {
                    anyhow::bail!("Process {} did not exit within {} ms", spawned.pid, wait_ms);
                }
            }
        }
        Commands::RunSession { command, launch } => {
            if !proctl::platform::elevation::is_elevated().unwrap_or(false) {
                tracing::warn!("Not elevated; launching into the active session will likely fail");
            }
            let spawned = proctl::create_in_active_session(&command, &launch.options())
                .context("Failed to launch into the active session")?;
            println!("{}", spawned.pid);
        }
    }

    Ok(())
}
