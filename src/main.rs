use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use fujiac_lib::serialport::FujitsuAC;
use fujiac_lib::session::Role;
use log::*;
use std::{ops::Deref, panic, time::Duration, time::Instant};

mod commandline;
mod daemon;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_state(ac: &FujitsuAC) {
    let session = ac.session();
    println!("Bound:           {}", ac.is_bound());
    println!("Power:           {}", if session.get_on_off() { "on" } else { "off" });
    println!("Temperature:     {} (raw)", session.get_temp());
    println!("Mode:            {}", session.get_mode());
    println!("Fan:             {}", session.get_fan_mode());
    println!("Economy:         {}", session.get_economy_mode());
    println!("Swing:           {}", session.get_swing_mode());
    println!("Swing step:      {}", session.get_swing_step());
    println!("Controller temp: {} (raw)", session.get_controller_temp());
    println!("Error code:      {}", session.current_state().ac_error);
}

/// Polls the bus until `done` says we are finished or the deadline
/// passes. The bus only talks every second or so, hence the generous
/// defaults.
fn poll_until(
    ac: &mut FujitsuAC,
    deadline: Duration,
    mut done: impl FnMut(&FujitsuAC) -> bool,
) -> Result<()> {
    let start = Instant::now();
    while start.elapsed() < deadline {
        ac.poll().with_context(|| "Cannot poll the bus")?;
        if done(ac) {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    bail!("Timed out after {deadline:?} waiting for the indoor unit")
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let role = if args.secondary {
        Role::Secondary
    } else {
        Role::Primary
    };

    let mut ac = FujitsuAC::connect(&args.device, role)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    ac.set_receive_timeout(args.timeout);

    match args.command {
        commandline::CliCommands::Status => {
            poll_until(&mut ac, Duration::from_secs(10), |ac| ac.is_bound())?;
            print_state(&ac);
        }
        commandline::CliCommands::Monitor => {
            let mut last = *ac.session().current_state();
            let mut ever_bound = false;
            loop {
                ac.poll().with_context(|| "Cannot poll the bus")?;
                let current = *ac.session().current_state();
                if (current != last) || (ac.is_bound() && !ever_bound) {
                    ever_bound = true;
                    last = current;
                    println!("{current}");
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        commandline::CliCommands::Set {
            power,
            temp,
            mode,
            fan,
            economy,
            swing,
            swing_step,
            wait,
        } => {
            let session = ac.session_mut();
            if let Some(on) = power {
                session.set_on_off(on);
            }
            if let Some(t) = temp {
                session.set_temp(t);
            }
            if let Some(m) = mode {
                session.set_mode(m);
            }
            if let Some(f) = fan {
                session.set_fan_mode(f);
            }
            if let Some(e) = economy {
                session.set_economy_mode(e);
            }
            if let Some(s) = swing {
                session.set_swing_mode(s);
            }
            if let Some(s) = swing_step {
                session.set_swing_step(s);
            }
            if !session.update_pending() {
                bail!("No setting given; see 'set --help' for the available flags");
            }

            poll_until(&mut ac, wait, |ac| !ac.update_pending())?;
            println!("Settings written to the unit.");
            print_state(&ac);
        }
        commandline::CliCommands::Daemon { output, interval } => {
            daemon::run(ac, output, interval)?
        }
    }

    Ok(())
}
