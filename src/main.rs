use log::{LevelFilter, error, info};
use shm_transfer::{
    Error, FileReceiver, FileSender, Result, Role, Session, TransferConfig, interrupt,
};
use std::env;
use std::io::Write;
use std::path::Path;

fn main() {
    init_logger();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("shm-transfer");

    let result = match (args.get(1).map(String::as_str), args.len()) {
        (Some("send"), 3) => send(Path::new(&args[2])),
        (Some("recv"), 2) => recv(),
        _ => {
            eprintln!("Usage: {} send <FILE> | recv", program);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}

fn init_logger() {
    let mut builder = env_logger::Builder::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Info);
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        )
    });

    builder.init();
}

fn send(path: &Path) -> Result<()> {
    let config = TransferConfig::from_env()?;
    let session = Session::attach(&config)?;

    let result = FileSender::new(session.buffer(), session.channel()).send_file(path);
    let stats = session.conclude(Role::Sender, result)?;

    info!("The number of bytes sent is {}", stats.bytes);
    Ok(())
}

fn recv() -> Result<()> {
    let config = TransferConfig::from_env()?;
    let session = {
        // A signal arriving before the handler is in place is delivered
        // once it is, instead of killing us with the objects still around.
        let _masked = interrupt::block_signals()
            .map_err(|source| Error::ResourceUnavailable { op: "pthread_sigmask", source })?;
        let session = Session::attach(&config)?;
        interrupt::install(&session)?;
        session
    };
    info!("waiting for a sender on key {:#x}", session.key());

    let result = FileReceiver::new(session.buffer(), session.channel())
        .with_output_dir(&config.output_dir)
        .with_suffix(config.recv_suffix.as_str())
        .receive();
    // The receiver removes the segment and queue even when the transfer
    // failed, so a blocked sender gets EIDRM instead of hanging.
    let received = session.conclude(Role::Receiver, result)?;

    info!(
        "The number of bytes received is {} ({})",
        received.stats.bytes,
        received.path.display()
    );
    Ok(())
}
