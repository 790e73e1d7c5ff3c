use std::net::SocketAddr;
use std::time::{Duration, Instant};

use clap::Parser;

use skirmish::{
    ClientSession, ConnectionState, FixedTimestep, SyncConfig, UdpTransport, DEFAULT_PORT,
};

#[derive(Parser)]
#[command(name = "skirmish-client")]
#[command(about = "Headless skirmish sync client")]
struct Args {
    #[arg(short, long, help = "Server address (e.g., 127.0.0.1:26015)")]
    server: String,

    #[arg(short, long, default_value = "observer", help = "Player name")]
    name: String,

    #[arg(long, help = "Local simulation rate in ticks per second")]
    tick_rate: Option<u32>,

    #[arg(long, default_value_t = 300, help = "Seconds between world summaries, in ticks")]
    summary_interval: u32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let server: SocketAddr = resolve(&args.server)?;

    let mut config = SyncConfig::default();
    if let Some(rate) = args.tick_rate {
        config.tick_rate = rate;
    }

    let mut transport = UdpTransport::bind("0.0.0.0:0")?;
    transport.set_remote(server);
    log::info!("bound {} -> {}", transport.local_addr(), server);

    let mut session = ClientSession::new(config.clone());
    session.connect(&args.name);

    let mut timestep = FixedTimestep::new(config.tick_rate);
    let mut last = Instant::now();
    let mut previous_state = session.state();
    let mut ticks: u64 = 0;

    while session.state() != ConnectionState::Disconnected {
        let now = Instant::now();
        timestep.accumulate(now.duration_since(last).as_secs_f32());
        last = now;

        for datagram in transport.receive()? {
            if let Err(err) = session.handle_datagram(&datagram) {
                log::error!("session error: {}", err);
            }
        }

        while timestep.consume_tick() {
            session.step();
            ticks += 1;

            if ticks % u64::from(args.summary_interval) == 0
                && session.state() == ConnectionState::InGame
            {
                log::info!(
                    "index {} entities {} sectors {} rx {} dup {}",
                    session.world_index(),
                    session.entities().count(),
                    session.sectors().count(),
                    session.stats().datagrams_received,
                    session.stats().datagrams_duplicate,
                );
            }
        }

        let state = session.state();
        if state != previous_state {
            log::info!("state: {:?} -> {:?}", previous_state, state);
            previous_state = state;
        }

        for datagram in session.drain_outgoing() {
            if let Err(err) = transport.send(&datagram) {
                log::warn!("send failed: {}", err);
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    match session.disconnect_reason() {
        Some(reason) => log::info!("session over: {}", reason.describe()),
        None => log::info!("session over"),
    }
    Ok(())
}

fn resolve(addr: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(parsed) = addr.parse() {
        return Ok(parsed);
    }
    // Bare host; assume the default port.
    Ok(format!("{addr}:{DEFAULT_PORT}").parse()?)
}
