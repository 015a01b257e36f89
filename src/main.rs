use argh::FromArgs;
use log::{error, info};

use antpower::{
    channel::Config, device::powermeter, session::DEFAULT_DEVICE, NetworkKey, PowerMeter,
    Settings, UsbDriver,
};

#[derive(FromArgs)]
#[argh(description = "Print the power broadcast by an ANT+ power meter")]
struct Args {
    #[argh(option, short = 'd')]
    #[argh(description = "ANT USB stick to use, VVVV or VVVV:PPPP in hex")]
    #[argh(default = "DEFAULT_DEVICE.to_string()")]
    device: String,

    #[argh(option, short = 'p')]
    #[argh(description = "channel period in 1/32768 s counts, 8182 or 4091")]
    #[argh(default = "powermeter::CHANNEL_PERIOD")]
    period: u16,

    #[argh(option, short = 'f')]
    #[argh(description = "RF frequency as an offset from 2400 MHz")]
    #[argh(default = "powermeter::RF_FREQUENCY")]
    frequency: u8,

    #[argh(option, short = 'k')]
    #[argh(description = "network key as 16 hex digits")]
    #[argh(default = "NetworkKey::default()")]
    network_key: NetworkKey,
}

fn main() {
    env_logger::init();
    let args: Args = argh::from_env();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    })?;

    let settings = Settings::new(args.device, args.network_key).channel(
        Config::power_meter()
            .period(args.period)
            .frequency(args.frequency),
    );
    let mut meter = PowerMeter::new(UsbDriver::new()?, settings, |power: u16| {
        println!("{}", power)
    });

    let _session = meter.session()?;
    let _ = quit_rx.recv();
    info!("Interrupted, stopping");
    Ok(())
}
