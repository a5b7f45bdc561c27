pub mod net;

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use wiretable::{NetworkStringTable, StringIndex, StringTableObserver};

use net::{ClientConfig, ClientEvent, QueryClient, TableClient};

#[derive(Parser)]
#[command(name = "wiretable-client")]
#[command(about = "Queries wiretable servers and mirrors their string tables")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27015",
        help = "Server address (e.g., 127.0.0.1:27015)"
    )]
    server: String,

    #[arg(long, default_value_t = 500, help = "Retry interval for requests in ms")]
    retry_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the server's name, map and player count
    Info,
    /// Show server info plus its string tables
    Details,
    /// List connected players
    Players,
    /// List server rules
    Rules,
    /// Run a remote console command
    Rcon {
        #[arg(short, long)]
        password: String,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Connect and keep a live copy of the string tables
    Connect {
        #[arg(short, long, default_value = "player")]
        name: String,
        #[arg(long, help = "Log every string as it arrives")]
        verbose_tables: bool,
        #[arg(long, help = "Print the tables and quit once they are in sync")]
        dump: bool,
    },
}

/// Logs each replicated string as it changes.
struct LoggingObserver;

impl StringTableObserver for LoggingObserver {
    fn string_changed(&mut self, table: &NetworkStringTable, index: StringIndex) {
        if let Some(entry) = table.entry(index) {
            match entry.user_data() {
                Some(data) if !data.is_empty() => log::info!(
                    "{}[{}] = {} ({} bytes)",
                    table.name(),
                    index,
                    entry.string(),
                    data.len()
                ),
                _ => log::info!("{}[{}] = {}", table.name(), index, entry.string()),
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let server = resolve(&args.server)?;
    let config = ClientConfig {
        retry_interval_ms: args.retry_ms,
        ..ClientConfig::default()
    };

    match args.command {
        Command::Info => {
            let info = QueryClient::new(server, &config)?.info()?;
            println!("hostname: {}", info.hostname);
            println!("map:      {}", info.map);
            println!("players:  {}/{}", info.players, info.max_players);
            println!("protocol: {}", info.protocol);
            println!("flags:    {:?}", info.flags);
        }
        Command::Details => {
            let details = QueryClient::new(server, &config)?.details()?;
            println!(
                "{} on {} at tick {} ({} Hz)",
                details.info.hostname, details.info.map, details.tick, details.tick_rate
            );
            for table in &details.tables {
                println!("  {:<16} {:>6} / {}", table.name, table.len, table.max_entries);
            }
        }
        Command::Players => {
            let players = QueryClient::new(server, &config)?.players()?;
            if players.is_empty() {
                println!("no players");
            }
            for player in players {
                println!(
                    "#{:<4} {:<32} {}s",
                    player.client_id, player.name, player.connected_secs
                );
            }
        }
        Command::Rules => {
            for rule in QueryClient::new(server, &config)?.rules()? {
                println!("{} = {}", rule.key, rule.value);
            }
        }
        Command::Rcon { password, command } => {
            let output = QueryClient::new(server, &config)?.rcon(&password, &command.join(" "))?;
            println!("{}", output.trim_end());
        }
        Command::Connect {
            name,
            verbose_tables,
            dump,
        } => {
            let config = ClientConfig { name, ..config };
            run_replica(server, config, verbose_tables, dump)?;
        }
    }

    Ok(())
}

fn resolve(addr: &str) -> anyhow::Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("invalid server address '{}'", addr))?
        .next()
        .with_context(|| format!("'{}' did not resolve", addr))
}

fn run_replica(
    server: SocketAddr,
    config: ClientConfig,
    verbose_tables: bool,
    dump: bool,
) -> anyhow::Result<()> {
    let mut client = TableClient::new(config)?;
    if verbose_tables {
        client.set_observer(Box::new(LoggingObserver));
    }
    client.connect(server)?;

    let running = client.running();
    let mut last_progress = Instant::now();

    while running.load(Ordering::SeqCst) {
        client.update()?;

        for event in client.drain_events().collect::<Vec<_>>() {
            match event {
                ClientEvent::Connected { client_id } => {
                    println!("connected to {} as client {}", server, client_id);
                }
                ClientEvent::Rejected { reason } => bail!("connection rejected: {}", reason),
                ClientEvent::TablesSynced { tick, strings } => {
                    println!("tables in sync at tick {} ({} strings)", tick, strings);
                    if dump {
                        print_tables(&client);
                        client.shutdown();
                    }
                }
                ClientEvent::TablesUpdated { tick } => log::debug!("tables at tick {}", tick),
                ClientEvent::Disconnected { reason } => {
                    println!("disconnected: {}", reason);
                    running.store(false, Ordering::SeqCst);
                }
            }
        }

        if last_progress.elapsed() >= Duration::from_secs(1) {
            if let Some((received, total)) = client.sync_progress() {
                log::info!("snapshot {}/{} chunks", received, total);
            }
            last_progress = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    Ok(())
}

fn print_tables(client: &TableClient) {
    for table in client.tables().tables() {
        println!("{} ({}/{})", table.name(), table.len(), table.max_entries());
        for (index, entry) in table.iter() {
            println!("  {:>5}: {}", index, entry.string());
        }
    }
}
