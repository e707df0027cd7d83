//! Application definition.

extern crate simplelog;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Error, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;

use spineml_net::{
    Client, Connection, ConnectionId, Direction, Server, ServerConfig, ServerHandle,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Wait between iterations of the host loop.
const HOST_LOOP_WAIT: Duration = Duration::from_millis(10);
/// Phase increment of the generated signal per timestep.
const SIGNAL_STEP: f64 = 0.05;

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("spineml")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .version(VERSION)
        .author(AUTHORS)
        .about("Serve and test streaming connections between an experiment engine \
                and external numeric clients.")
        .arg(Arg::with_name("verbosity")
            .long("verbosity")
            .short("v")
            .takes_value(true)
            .default_value("info")
            .value_name("verb")
            .global(true)
            .help("Set the verbosity of the log output"))

        // server subcommand
        .subcommand(SubCommand::with_name("server")
            .display_order(1)
            .about("Start a server")
            .long_about("Start a server\n\n\
            Target clients are fed a generated sine signal, frames coming from source \n\
            clients are logged and discarded.\n\n\
            NOTE: data sent between client and server is not encrypted, connection \n\
            is not secure!")
            .arg(Arg::with_name("config")
                .display_order(1)
                .long("config")
                .short("c")
                .takes_value(true)
                .value_name("config-path")
                .help("Path to a toml file with server configuration"))
            .arg(Arg::with_name("port")
                .display_order(2)
                .long("port")
                .short("p")
                .takes_value(true)
                .value_name("port")
                .help("Set the listening port, overrides the config file"))
            .arg(Arg::with_name("max-idle-reads")
                .display_order(3)
                .long("max-idle-reads")
                .takes_value(true)
                .value_name("count")
                .help("Number of consecutive empty reads after which a connection \
                fails, overrides the config file"))
            .arg(Arg::with_name("print-config")
                .display_order(4)
                .long("print-config")
                .help("Print the resolved configuration as toml and quit"))
        )

        // client subcommand
        .subcommand(SubCommand::with_name("client")
            .display_order(2)
            .about("Connect to a server and exchange frames")
            .arg(Arg::with_name("server-addr")
                .display_order(1)
                .long("server")
                .short("s")
                .takes_value(true)
                .default_value("127.0.0.1:50099")
                .value_name("address")
                .help("Address of the server"))
            .arg(Arg::with_name("direction")
                .display_order(2)
                .long("direction")
                .short("d")
                .takes_value(true)
                .required(true)
                .possible_values(&["source", "target"])
                .value_name("direction")
                .help("Whether the client sends (source) or receives (target) frames"))
            .arg(Arg::with_name("size")
                .display_order(3)
                .long("size")
                .short("n")
                .takes_value(true)
                .required(true)
                .value_name("doubles")
                .help("Number of doubles per timestep"))
            .arg(Arg::with_name("frames")
                .display_order(4)
                .long("frames")
                .short("f")
                .takes_value(true)
                .default_value("10")
                .value_name("count")
                .help("Number of frames to exchange before finishing"))
        )
}

/// Runs based on specified subcommand.
pub fn start(matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        ("server", Some(m)) => start_server(m),
        ("client", Some(m)) => start_client(m),
        _ => Ok(()),
    }
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match matches.value_of(name) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| Error::msg(format!("failed parsing {} from \"{}\": {}", name, s, e))),
        None => Ok(None),
    }
}

fn server_config(matches: &ArgMatches) -> Result<ServerConfig> {
    let mut config = match matches.value_of("config") {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = parse_arg(matches, "port")? {
        config.port = port;
    }
    if let Some(max) = parse_arg(matches, "max-idle-reads")? {
        config.max_idle_reads = max;
    }
    config.validate()?;
    Ok(config)
}

fn start_server(matches: &ArgMatches) -> Result<()> {
    let config = server_config(matches)?;
    if matches.is_present("print-config") {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    setup_log_verbosity(matches);

    let mut server = Server::start(config)?;
    println!("listening for new clients on: {}", server.local_addr());

    // run a loop allowing graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut host = HostAdapter::default();
    while running.load(Ordering::SeqCst) {
        host.poll(&server);
        thread::sleep(HOST_LOOP_WAIT);
    }

    println!("Initiating graceful shutdown...");
    server.stop();
    Ok(())
}

/// Moves data between the running server and a generated signal.
#[derive(Default)]
struct HostAdapter {
    /// Last printed state of each connection
    states: HashMap<ConnectionId, String>,
    /// Timestep counter of each target connection
    steps: HashMap<ConnectionId, u64>,
}

impl HostAdapter {
    fn poll(&mut self, server: &ServerHandle) {
        for conn in server.registry().connections() {
            self.report(&conn);
            if !conn.is_established() {
                continue;
            }
            match conn.direction() {
                Direction::Target => self.feed(&conn),
                Direction::Source => {
                    while let Some(frame) = conn.pop_frame() {
                        debug!("connection {}: got frame {:?}", conn.id(), frame);
                    }
                }
                Direction::Unset => (),
            }
        }
        for id in server.registry().reap() {
            self.states.remove(&id);
            self.steps.remove(&id);
            println!("connection {} removed", id);
        }
    }

    /// Keeps a single frame worth of samples queued for a target client.
    fn feed(&mut self, conn: &Connection) {
        let size = conn.data_size() as usize;
        if size == 0 || conn.queued() >= size {
            return;
        }
        let step = self.steps.entry(conn.id()).or_insert(0);
        let phase = *step as f64 * SIGNAL_STEP;
        let frame: Vec<f64> = (0..size)
            .map(|i| (phase + i as f64 / size as f64).sin())
            .collect();
        conn.push_samples(&frame);
        *step += 1;
    }

    fn report(&mut self, conn: &Connection) {
        let status = conn.status();
        let state = if status.failed {
            "failed".red().to_string()
        } else if status.established {
            "established".green().to_string()
        } else if conn.is_closed() {
            "closed".yellow().to_string()
        } else {
            "pending".normal().to_string()
        };
        if self.states.get(&status.id) == Some(&state) {
            return;
        }
        match conn.failure() {
            Some((kind, msg)) => println!(
                "connection {} from {}: {} ({:?}: {})",
                status.id, status.peer_addr, state, kind, msg
            ),
            None if status.established => println!(
                "connection {} from {}: {}, {} {} x{}",
                status.id,
                status.peer_addr,
                state,
                status.direction,
                status.data_type,
                status.data_size
            ),
            None => println!("connection {} from {}: {}", status.id, status.peer_addr, state),
        }
        self.states.insert(status.id, state);
    }
}

fn start_client(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let addr = matches
        .value_of("server-addr")
        .ok_or_else(|| Error::msg("server address must be provided"))?;
    let direction: Direction = parse_arg(matches, "direction")?
        .ok_or_else(|| Error::msg("direction must be provided"))?;
    let size: u32 =
        parse_arg(matches, "size")?.ok_or_else(|| Error::msg("size must be provided"))?;
    let frames: u64 = parse_arg(matches, "frames")?.unwrap_or(10);

    let mut client = Client::connect(addr, direction, size)?;
    println!("connected to {} as {}, {} doubles per timestep", addr, direction, size);

    for n in 0..frames {
        match direction {
            Direction::Source => {
                let frame: Vec<f64> = (0..size).map(|i| (n * size as u64 + i as u64) as f64).collect();
                client.send_frame(&frame)?;
                println!("sent frame {}: {:?}", n, frame);
            }
            _ => {
                let frame = client.recv_frame()?;
                println!("received frame {}: {:?}", n, frame);
            }
        }
    }
    client.finish()?;
    println!("finished after {} frames", frames);
    Ok(())
}

fn setup_log_verbosity(matches: &ArgMatches) {
    use self::simplelog::{LevelFilter, TermLogger};
    let level_filter = match matches.value_of("verbosity") {
        Some(s) => match s {
            "0" | "none" => LevelFilter::Off,
            "1" | "err" | "error" | "min" => LevelFilter::Error,
            "2" | "warn" | "warning" | "default" => LevelFilter::Warn,
            "3" | "info" => LevelFilter::Info,
            "4" | "debug" => LevelFilter::Debug,
            "5" | "trace" | "max" | "all" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        _ => LevelFilter::Warn,
    };
    let logger_conf = simplelog::ConfigBuilder::new()
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Debug)
        .set_location_level(LevelFilter::Trace)
        .set_time_format_str("%H:%M:%S%.6f")
        .build();
    if TermLogger::init(level_filter, logger_conf, simplelog::TerminalMode::Mixed).is_err() {
        eprintln!("failed initializing logger");
    }
}
