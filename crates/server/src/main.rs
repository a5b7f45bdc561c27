mod config;
mod events;
mod manifest;
mod rcon;
mod server;
mod session;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerConfig;
use manifest::Manifest;
use server::TableServer;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "wiretable-server")]
#[command(about = "Replicates network string tables to connected clients")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = wiretable::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = wiretable::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value = "wiretable server")]
    hostname: String,

    #[arg(long, default_value = "default")]
    map: String,

    #[arg(long, help = "Remote console password; rcon is disabled without one")]
    rcon_password: Option<String>,

    #[arg(long, help = "File of '<table> <string>' lines loaded on every level")]
    manifest: Option<PathBuf>,

    #[arg(long)]
    headless: bool,

    #[arg(long, default_value_t = 30)]
    client_timeout: u64,

    #[arg(long, default_value_t = 10)]
    challenge_lifetime: u64,

    #[arg(long, default_value_t = 64, help = "Connectionless packets handled per tick")]
    connectionless_budget: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let manifest = args
        .manifest
        .as_deref()
        .map(|path| {
            Manifest::load(path).with_context(|| format!("loading {}", path.display()))
        })
        .transpose()?;

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        hostname: args.hostname,
        map: args.map,
        rcon_password: args.rcon_password,
        dedicated: true,
        client_timeout_secs: args.client_timeout,
        challenge_lifetime_secs: args.challenge_lifetime,
        max_connectionless_per_tick: args.connectionless_budget,
        ..Default::default()
    };

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    if let Some(manifest) = &manifest {
        log::info!("Manifest holds {} entries", manifest.len());
    }

    let mut server = TableServer::new(&bind_addr, config, manifest)?;

    if args.headless {
        log::info!("Server started on {}", server.local_addr());
        server.run();
        log::info!("Server shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_with_tui(server: &mut TableServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();

    tui_state.log_info(format!("Server started on {}", server.local_addr()));

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            if event.is_error() {
                tui_state.log_error(event.to_string());
            } else if event.is_warning() {
                tui_state.log_warn(event.to_string());
            } else {
                tui_state.log_info(event.to_string());
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                {
                    running.store(false, Ordering::SeqCst);
                }
            }
        }

        let stats = server.stats();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats);
        })?;
    }

    tui_state.log_info("Shutting down...");
    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
